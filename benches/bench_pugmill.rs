#![allow(
    clippy::tests_outside_test_module,
    clippy::unwrap_used,
    reason = "benchmark"
)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use pugmill::{PugmillEngine, PugmillInterface, Value};

mod utils;

fn pugmill_benchmark(c: &mut Criterion) {
    // Create the pugmill engine
    let mut engine = PugmillEngine::new();

    // Load the template from file
    let template_content = include_str!("template_pugmill.pug");

    // Add template to engine and link it once up front
    engine.add_template("orders", template_content).unwrap();
    let template = engine.compile("orders").unwrap();

    // Generate random contexts and convert them to template data
    let contexts: Vec<Value> = utils::generate_order_pages(utils::PAGE_COUNT)
        .into_iter()
        .map(create_pugmill_data)
        .collect();

    // Print binary size information
    utils::print_binary_size();

    // Setup benchmark group
    let mut group = c.benchmark_group("Template Rendering");
    group.sample_size(50);

    // Rendering a compiled template
    group.bench_function("pugmill_render", |b| {
        b.iter(|| {
            for context in &contexts {
                black_box(template.render(context).unwrap());
            }
        });
    });

    // Linking and rendering by name on every call
    group.bench_function("pugmill_compile_and_render", |b| {
        b.iter(|| {
            for context in &contexts {
                black_box(engine.render("orders", context).unwrap());
            }
        });
    });

    group.finish();
}

// Convert JSON data to template data
fn create_pugmill_data(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map_or_else(|| Value::Float(n.as_f64().unwrap_or(0.0)), Value::Int),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(create_pugmill_data).collect())
        }
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (k, create_pugmill_data(v)))
            .collect(),
    }
}

criterion_group!(benches, pugmill_benchmark);
criterion_main!(benches);
