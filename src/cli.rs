//! Interface de linha de comando do outbox baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (tick, enqueue,
//! publish, status) e flags globais (--config, --verbose, --log-json).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fila de jobs baseada em arquivos: um tick processa o outbox e publica resultados.
#[derive(Debug, Parser)]
#[command(name = "outbox", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração TOML (padrão: `outbox.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita logs de depuração.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emite os logs em JSON, uma linha por evento.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Processa os jobs pendentes até esvaziar a fila ou atingir um limite.
    Tick {
        /// Máximo de jobs tentados neste tick.
        #[arg(long)]
        max_jobs: Option<usize>,

        /// Orçamento de tempo do tick, em segundos.
        #[arg(long)]
        max_duration_secs: Option<u64>,
    },

    /// Coloca um novo job na fila.
    Enqueue {
        /// Tipo do job (ex.: ROI_SCAN).
        #[arg(long = "type")]
        job_type: Option<String>,

        /// Payload JSON inline.
        #[arg(long, conflicts_with = "file")]
        payload: Option<String>,

        /// Arquivo com o documento JSON do job.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Identificador explícito do job.
        #[arg(long)]
        id: Option<String>,
    },

    /// Publica os artefatos novos ou alterados no destino configurado.
    Publish,

    /// Mostra a contagem de jobs por estado.
    Status,
}
