//! Inicialização do tracing.
//!
//! O filtro vem de `RUST_LOG`; sem ele usa `info` (ou `debug` com
//! `--verbose`). Os logs vão para stderr para não misturar com a saída da CLI.

use tracing_subscriber::EnvFilter;

/// Instala o subscriber global. Chamadas repetidas são ignoradas.
pub fn init(verbose: bool, json: bool) {
    let default = if verbose { "outbox=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}
