//! Coordinator server command.

use std::sync::Arc;

use console::style;

use crate::api::AltTextClient;
use crate::config::Settings;
use crate::coordinator::BatchCoordinator;
use crate::repository::SqliteMediaRepository;

/// Start the batch coordinator server.
pub async fn cmd_serve(settings: &Settings, bind: &str) -> anyhow::Result<()> {
    let (host, port) = parse_bind_address(bind, settings.server.port)?;

    std::fs::create_dir_all(&settings.data_dir)?;
    let repo = Arc::new(SqliteMediaRepository::open(&settings.database_path())?);
    println!("  {} Database ready", style("✓").green());

    let backend = Arc::new(AltTextClient::new(settings.api.clone()));
    let coordinator = Arc::new(BatchCoordinator::new(
        repo,
        backend,
        settings.eligibility.to_policy(),
        settings.generation.clone(),
    ));

    println!(
        "{} Starting batch server at http://{}:{}",
        style("→").cyan(),
        host,
        port
    );
    println!("  Press Ctrl+C to stop");

    crate::server::serve(coordinator, &host, port).await
}

/// Parse a bind address that can be:
/// - Just a port: "7231" -> 127.0.0.1:7231
/// - Just a host: "0.0.0.0" -> 0.0.0.0:<default>
/// - Host and port: "0.0.0.0:7231" -> 0.0.0.0:7231
fn parse_bind_address(bind: &str, default_port: u16) -> anyhow::Result<(String, u16)> {
    if let Ok(port) = bind.parse::<u16>() {
        return Ok(("127.0.0.1".to_string(), port));
    }

    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return Ok((host.to_string(), port));
        }
    }

    Ok((bind.to_string(), default_port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bind_variants() {
        assert_eq!(
            parse_bind_address("9000", 7231).unwrap(),
            ("127.0.0.1".to_string(), 9000)
        );
        assert_eq!(
            parse_bind_address("0.0.0.0", 7231).unwrap(),
            ("0.0.0.0".to_string(), 7231)
        );
        assert_eq!(
            parse_bind_address("0.0.0.0:9000", 7231).unwrap(),
            ("0.0.0.0".to_string(), 9000)
        );
    }
}
