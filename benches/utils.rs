#![allow(dead_code, reason = "Each benchmark binary uses a different subset of the helpers.")]

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

/// Order pages rendered per benchmark iteration.
pub const PAGE_COUNT: usize = 100;

const STATUSES: [&str; 3] = ["pending", "paid", "shipped"];
const TAGS: [&str; 5] = ["gift", "express", "fragile", "bulk", "return"];

/// Seeded order pages for the benchmark templates. Roughly one page in ten
/// has no orders so the `else` branch of the order loop runs too.
pub fn generate_order_pages(n: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|_| {
            let order_count = if rng.random_bool(0.1) {
                0
            } else {
                rng.random_range(1..6)
            };
            let orders: Vec<Value> = (0..order_count).map(|_| random_order(&mut rng)).collect();
            json!({
                "customer": {
                    "name": random_word(&mut rng, 4, 12),
                    "vip": rng.random_bool(0.2),
                },
                "orders": orders,
            })
        })
        .collect()
}

fn random_order(rng: &mut StdRng) -> Value {
    let lines: Vec<Value> = (0..rng.random_range(1..8))
        .map(|_| {
            json!({
                "sku": format!("{}-{}", random_word(rng, 3, 3).to_uppercase(), rng.random_range(100..1000)),
                "qty": rng.random_range(1..10),
                "price": rng.random_range(99..50_000),
            })
        })
        .collect();
    let tags: Vec<&str> = TAGS
        .iter()
        .copied()
        .filter(|_| rng.random_bool(0.25))
        .collect();
    json!({
        "id": rng.random_range(1000..100_000),
        "status": STATUSES[rng.random_range(0..STATUSES.len())],
        "lines": lines,
        "tags": tags,
    })
}

fn random_word(rng: &mut StdRng, min_len: usize, max_len: usize) -> String {
    let len = rng.random_range(min_len..=max_len);
    (0..len).map(|_| char::from(rng.random_range(b'a'..=b'z'))).collect()
}

/// Size of the running benchmark binary, printed once per run.
pub fn print_binary_size() {
    let binary_path = std::env::current_exe().unwrap();
    let size_bytes = std::fs::metadata(&binary_path).unwrap().len();
    println!(
        "Binary size: {:.2} KB ({size_bytes} bytes) at {}",
        size_bytes as f64 / 1024.0,
        binary_path.display()
    );
}
