//! Configuração do blockvoice carregada a partir de `blockvoice.toml`.
//!
//! A struct [`BlockvoiceConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! Variáveis de ambiente (`BLOCKVOICE_*` e `<PROVEDOR>_API_KEY`) têm
//! precedência sobre o arquivo.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::assembly::FailurePolicy;

/// Nome do arquivo procurado no diretório atual quando `--config` não é dado.
pub const DEFAULT_CONFIG_FILE: &str = "blockvoice.toml";

/// Configuração de nível superior carregada de `blockvoice.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockvoiceConfig {
    /// Diretório de trabalho para os WAVs temporários de blocos e do composto.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Quantidade de executores de unidade rodando em paralelo.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Idade mínima, em segundos, para um arquivo temporário ser removido.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Intervalo entre duas varreduras de limpeza/timeout.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Jobs ainda `queued`/`processing` após esse tempo são marcados como falhos.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Tempo limite de cada chamada de síntese.
    #[serde(default = "default_synthesis_timeout_secs")]
    pub synthesis_timeout_secs: u64,

    /// Máximo de entregas de uma mensagem antes de descartá-la.
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,

    /// O que fazer quando alguma unidade falhou e o job chegou ao fim.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// URL do serviço de diacritização. Sem ela, blocos com `diacritize`
    /// falham na normalização.
    #[serde(default)]
    pub diacritizer_url: Option<String>,

    /// Provedores de voz, indexados pelo nome usado nos blocos.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// Tipo de API falada por um provedor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    ElevenLabs,
    Kokoro,
    Ghaymah,
}

/// Uma entrada `[providers.<nome>]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// Chave da API; `<NOME>_API_KEY` no ambiente tem precedência.
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    /// Nome de exibição → identificador da voz.
    #[serde(default)]
    pub voices: BTreeMap<String, String>,

    /// Taxa de amostragem pedida a provedores que devolvem PCM cru.
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sled,
}

/// Onde ficam os registros de jobs e unidades.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    Http,
}

/// Um destino de armazenamento durável.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageTarget {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Diretório raiz para o backend `local`.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// URL base para o backend `http`.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Armazenamento primário mais um espelho opcional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(flatten)]
    pub primary: StorageTarget,

    #[serde(default)]
    pub mirror: Option<StorageTarget>,
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_workers() -> usize {
    4
}

// Uma hora, como a limpeza periódica de arquivos antigos.
fn default_retention_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_job_timeout_secs() -> u64 {
    1800
}

fn default_synthesis_timeout_secs() -> u64 {
    60
}

fn default_max_deliveries() -> u32 {
    3
}

fn default_store_path() -> PathBuf {
    PathBuf::from("blockvoice.db")
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("artifacts")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

impl Default for StorageTarget {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root: default_storage_root(),
            base_url: None,
        }
    }
}

impl Default for BlockvoiceConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            workers: default_workers(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            job_timeout_secs: default_job_timeout_secs(),
            synthesis_timeout_secs: default_synthesis_timeout_secs(),
            max_deliveries: default_max_deliveries(),
            failure_policy: FailurePolicy::default(),
            store: StoreConfig::default(),
            storage: StorageConfig::default(),
            diacritizer_url: None,
            providers: BTreeMap::new(),
        }
    }
}

impl BlockvoiceConfig {
    /// Carrega a configuração de `path`, ou de `blockvoice.toml` no diretório
    /// atual. Usa valores padrão se o arquivo implícito não existir; um
    /// caminho explícito inexistente é erro.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Intervalos e tempos limite precisam ser de pelo menos 1 segundo.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("synthesis_timeout_secs", self.synthesis_timeout_secs),
            ("job_timeout_secs", self.job_timeout_secs),
        ];
        for (name, value) in durations {
            if value == 0 {
                bail!("invalid configuration: {name} must be at least 1");
            }
        }
        Ok(())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Aplica as variáveis de ambiente por cima dos valores do arquivo.
    /// `lookup` é injetável para que os testes não mexam no ambiente do processo.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(dir) = lookup("BLOCKVOICE_TEMP_DIR") {
            self.temp_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("BLOCKVOICE_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(url) = lookup("BLOCKVOICE_DIACRITIZER_URL") {
            self.diacritizer_url = Some(url);
        }
        if let Some(workers) = lookup("BLOCKVOICE_WORKERS").and_then(|v| v.parse().ok()) {
            self.workers = workers;
        }
        for (name, provider) in &mut self.providers {
            if let Some(key) = lookup(&api_key_var(name)) {
                provider.api_key = key;
            }
        }
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// `openai` → `OPENAI_API_KEY`, `my-tts` → `MY_TTS_API_KEY`.
pub fn api_key_var(provider: &str) -> String {
    let name: String = provider
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{name}_API_KEY")
}
