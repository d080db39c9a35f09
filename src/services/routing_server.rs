//! Line-oriented stdin/stdout routing query loop.
//!
//! Each request is a single JSON object; the loop answers travel-time
//! queries until a shutdown command or end of input.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use super::routing::RoutingService;
use crate::types::Location;

#[derive(Debug, Deserialize)]
struct Request {
    command: String,
    #[serde(default)]
    source: Option<Endpoint>,
    #[serde(default)]
    target: Option<Endpoint>,
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Serialize)]
struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Response {
    fn duration(duration: Option<i64>) -> Self {
        Self {
            duration,
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            duration: None,
            error: Some(message.into()),
        }
    }
}

/// Serve routing queries over stdin/stdout until `shutdown` or EOF.
pub async fn run(routing: &dyn RoutingService) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(error) => {
                warn!("rejected malformed request: {}", error);
                write_response(&mut stdout, &Response::error(error.to_string())).await?;
                continue;
            }
        };

        match request.command.as_str() {
            "shutdown" => {
                debug!("shutdown requested");
                break;
            }
            "route" => {
                let response = match (request.source, request.target) {
                    (Some(source), Some(target)) => {
                        let from = Location::from_degrees(source.latitude, source.longitude);
                        let to = Location::from_degrees(target.latitude, target.longitude);
                        match routing.duration(from, to).await {
                            Ok(duration) => Response::duration(duration),
                            Err(error) => Response::error(error.to_string()),
                        }
                    }
                    _ => Response::error("route command requires source and target"),
                };
                write_response(&mut stdout, &response).await?;
            }
            other => {
                write_response(
                    &mut stdout,
                    &Response::error(format!("unknown command {:?}", other)),
                )
                .await?;
            }
        }
    }

    Ok(())
}

async fn write_response(stdout: &mut tokio::io::Stdout, response: &Response) -> Result<()> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    stdout.write_all(&payload).await?;
    stdout.flush().await?;
    Ok(())
}
