#![allow(
    clippy::wildcard_enum_match_arm,
    reason = "only comment and pipeless markers affect stripping"
)]

use tracing::trace;

use crate::error::{LexError, LexErrorCode};
use crate::token::{Token, TokenKind};

/// Which comments to drop from the token stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StripOptions {
    pub strip_unbuffered: bool,
    pub strip_buffered: bool,
}

impl Default for StripOptions {
    fn default() -> Self {
        Self {
            strip_unbuffered: true,
            strip_buffered: false,
        }
    }
}

/// Removes comment tokens, along with the pipeless text block that belongs
/// to each removed comment.
pub fn strip_comments(tokens: Vec<Token>, options: StripOptions) -> Result<Vec<Token>, LexError> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut in_comment = false;
    let mut in_pipeless = false;
    let mut last_location = None;

    for token in tokens {
        last_location = Some(token.location);
        match &token.kind {
            TokenKind::Comment { buffer, .. } => {
                let strip = if *buffer {
                    options.strip_buffered
                } else {
                    options.strip_unbuffered
                };
                if strip {
                    trace!(line = token.location.line, buffer, "stripping comment");
                    in_comment = true;
                } else {
                    out.push(token);
                }
            }
            TokenKind::StartPipelessText => {
                in_pipeless = true;
                if !in_comment {
                    out.push(token);
                }
            }
            TokenKind::EndPipelessText => {
                if !in_pipeless {
                    return Err(LexError::new(
                        LexErrorCode::UnterminatedPipelessText,
                        "end of pipeless text without a start",
                        token.location,
                    ));
                }
                in_pipeless = false;
                if in_comment {
                    in_comment = false;
                } else {
                    out.push(token);
                }
            }
            _ if in_pipeless => {
                if !in_comment {
                    out.push(token);
                }
            }
            _ => {
                // A stripped comment without a body ends at its own line.
                in_comment = false;
                out.push(token);
            }
        }
    }

    if in_pipeless {
        return Err(LexError::new(
            LexErrorCode::UnterminatedPipelessText,
            "pipeless text block was never closed",
            last_location.unwrap_or_default(),
        ));
    }
    Ok(out)
}
