//! Configuração do outbox carregada de `outbox.toml` e do ambiente.
//!
//! A struct [`OutboxConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults seguros, de modo que a
//! ausência total de configuração ainda produz um sistema executável.
//! Variáveis de ambiente (`IDA_*`, `ANTHROPIC_*`, `GITHUB_TOKEN`) têm
//! precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::OutboxError;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const DEFAULT_CONFIG_FILE: &str = "outbox.toml";

/// Configuração de nível superior carregada de `outbox.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
    /// Diretório com os jobs pendentes (a "outbox").
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,

    /// Diretório terminal para onde os jobs são movidos.
    #[serde(default = "default_done_dir")]
    pub done_dir: PathBuf,

    /// Diretório de artefatos e registros de resultado.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Diretório dos descritores de "needs".
    #[serde(default = "default_needs_dir")]
    pub needs_dir: PathBuf,

    /// Caminho do ops log (append-only).
    #[serde(default = "default_ops_log")]
    pub ops_log: PathBuf,

    /// Máximo de jobs processados por tick.
    #[serde(default = "default_max_jobs_per_tick")]
    pub max_jobs_per_tick: usize,

    /// Orçamento de tempo de um tick, em segundos.
    #[serde(default = "default_max_tick_secs")]
    pub max_tick_secs: u64,

    /// Timeout de cada handler, em segundos.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,

    /// Escreve `RUNNER_HEARTBEAT.md` a cada tick.
    #[serde(default = "default_write_heartbeat")]
    pub write_heartbeat: bool,

    /// Destino de publicação: `none`, `dir:<path>`, `git:<path>` ou `github:<owner/repo>[@branch]`.
    #[serde(default = "default_publish_sink")]
    pub publish_sink: String,

    /// Raízes varridas recursivamente pelo publisher.
    #[serde(default = "default_publish_roots")]
    pub publish_roots: Vec<PathBuf>,

    /// Arquivo de estado (fingerprints) do publisher.
    #[serde(default = "default_publish_state")]
    pub publish_state: PathBuf,

    /// Chave da API Anthropic. Vazia desativa a geração de texto.
    #[serde(default)]
    pub api_key: String,

    /// Modelo usado pelos handlers que geram texto.
    #[serde(default = "default_model")]
    pub model: String,

    /// Token do GitHub para o cliente de repositório remoto.
    #[serde(default)]
    pub github_token: String,
}

fn default_outbox_dir() -> PathBuf {
    PathBuf::from("agent_outbox")
}

fn default_done_dir() -> PathBuf {
    PathBuf::from("agent_outbox_done")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("agent_results")
}

fn default_needs_dir() -> PathBuf {
    PathBuf::from("ops/needs")
}

fn default_ops_log() -> PathBuf {
    PathBuf::from("ops/logs/outbox_worker.log")
}

// Valor padrão de jobs por tick: 20.
fn default_max_jobs_per_tick() -> usize {
    20
}

// Valor padrão do orçamento do tick: 10 minutos.
fn default_max_tick_secs() -> u64 {
    600
}

// Valor padrão do timeout por handler: 120s.
fn default_handler_timeout_secs() -> u64 {
    120
}

fn default_write_heartbeat() -> bool {
    true
}

fn default_publish_sink() -> String {
    "dir:published".to_string()
}

fn default_publish_roots() -> Vec<PathBuf> {
    vec![default_results_dir()]
}

fn default_publish_state() -> PathBuf {
    PathBuf::from("ops/publish_state.json")
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            outbox_dir: default_outbox_dir(),
            done_dir: default_done_dir(),
            results_dir: default_results_dir(),
            needs_dir: default_needs_dir(),
            ops_log: default_ops_log(),
            max_jobs_per_tick: default_max_jobs_per_tick(),
            max_tick_secs: default_max_tick_secs(),
            handler_timeout_secs: default_handler_timeout_secs(),
            write_heartbeat: default_write_heartbeat(),
            publish_sink: default_publish_sink(),
            publish_roots: default_publish_roots(),
            publish_state: default_publish_state(),
            api_key: String::new(),
            model: default_model(),
            github_token: String::new(),
        }
    }
}

impl OutboxConfig {
    /// Carrega a configuração de `path` (ou de `outbox.toml` no diretório atual)
    /// e aplica as variáveis de ambiente do processo por cima.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<OutboxConfig>(&contents).map_err(OutboxError::from)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Sobrescreve campos a partir de uma função de lookup de ambiente.
    ///
    /// Valores vazios são ignorados; valores numéricos inválidos são erro.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), OutboxError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("IDA_OUTBOX_DIR") {
            self.outbox_dir = PathBuf::from(v);
        }
        if let Some(v) = get("IDA_DONE_DIR") {
            self.done_dir = PathBuf::from(v);
        }
        if let Some(v) = get("IDA_RESULTS_DIR") {
            self.results_dir = PathBuf::from(v);
        }
        if let Some(v) = get("IDA_NEEDS_DIR") {
            self.needs_dir = PathBuf::from(v);
        }
        if let Some(v) = get("IDA_OPS_LOG") {
            self.ops_log = PathBuf::from(v);
        }
        if let Some(v) = get("IDA_MAX_JOBS_PER_RUN") {
            self.max_jobs_per_tick = parse_number("IDA_MAX_JOBS_PER_RUN", &v)?;
        }
        if let Some(v) = get("IDA_MAX_TICK_SECS") {
            self.max_tick_secs = parse_number("IDA_MAX_TICK_SECS", &v)?;
        }
        if let Some(v) = get("IDA_HANDLER_TIMEOUT_SECS") {
            self.handler_timeout_secs = parse_number("IDA_HANDLER_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("IDA_WRITE_HEARTBEAT") {
            self.write_heartbeat = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = get("IDA_PUBLISH_SINK") {
            self.publish_sink = v;
        }
        if let Some(v) = get("IDA_PUBLISH_ROOTS") {
            self.publish_roots = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(v) = get("IDA_PUBLISH_STATE") {
            self.publish_state = PathBuf::from(v);
        }
        // Variável de ambiente tem precedência sobre o arquivo para as credenciais.
        if let Some(v) = get("ANTHROPIC_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = get("ANTHROPIC_MODEL") {
            self.model = v;
        }
        if let Some(v) = get("GITHUB_TOKEN") {
            self.github_token = v;
        }

        Ok(())
    }

    /// Orçamento de tempo de um tick.
    pub fn max_tick_duration(&self) -> Duration {
        Duration::from_secs(self.max_tick_secs)
    }

    /// Timeout aplicado a cada chamada de handler.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, OutboxError> {
    value
        .parse::<T>()
        .map_err(|_| OutboxError::Config(format!("{key} must be a non-negative integer, got `{value}`")))
}
