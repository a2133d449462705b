//! Configuração do `tracing` para o binário.
//!
//! `RUST_LOG` tem precedência; sem ele o nível é `info` (ou `debug` com
//! `--verbose`). `RUST_LOG_FORMAT=json` troca a saída para JSON.

use tracing_subscriber::EnvFilter;

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "blockvoice=debug"
    } else {
        "blockvoice=info"
    }
}

/// Instala o subscriber global. Chamadas repetidas são ignoradas.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let is_json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    if is_json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
