//! Interface de linha de comando baseada em clap.
//!
//! Subcomandos: submit, status, result, audio, sweep, worker, providers, voices.
//! Flags globais: --config, --workers, --verbose.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// blockvoice: sintetiza blocos de texto em paralelo e monta um único áudio.
#[derive(Debug, Parser)]
#[command(name = "blockvoice", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração TOML (padrão: ./blockvoice.toml, se existir).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Número de workers concorrentes.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submete um job a partir de um arquivo JSON de blocos e o processa.
    Submit {
        /// JSON com uma lista de blocos, ou um objeto `{"blocks": [...]}`.
        file: PathBuf,

        /// Onde gravar o áudio final quando o job concluir.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Mostra o status de um job.
    Status { job_id: String },

    /// Mostra o resultado de um job concluído.
    Result { job_id: String },

    /// Exporta o áudio final de um job, ou de um bloco com --block.
    Audio {
        job_id: String,

        #[arg(long)]
        block: Option<usize>,

        #[arg(long, short)]
        output: PathBuf,
    },

    /// Executa uma passada de expiração e limpeza.
    Sweep,

    /// Retoma jobs interrompidos e processa até Ctrl-C, com varreduras periódicas.
    Worker,

    /// Lista os provedores configurados.
    Providers,

    /// Lista as vozes de um provedor.
    Voices { provider: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_submit() {
        let cli = Cli::parse_from(["blockvoice", "submit", "blocks.json", "-o", "out.wav"]);
        match cli.command {
            Command::Submit { file, output } => {
                assert_eq!(file, PathBuf::from("blocks.json"));
                assert_eq!(output, Some(PathBuf::from("out.wav")));
            }
            _ => panic!("expected Submit command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "blockvoice",
            "--config",
            "custom.toml",
            "--workers",
            "8",
            "--verbose",
            "providers",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.workers, Some(8));
        assert!(matches!(cli.command, Command::Providers));
    }

    #[test]
    fn cli_parses_worker() {
        let cli = Cli::parse_from(["blockvoice", "worker", "--workers", "2"]);
        assert!(matches!(cli.command, Command::Worker));
        assert_eq!(cli.workers, Some(2));
    }

    #[test]
    fn cli_parses_audio_block() {
        let cli = Cli::parse_from(["blockvoice", "audio", "j1", "--block", "2", "-o", "b.wav"]);
        match cli.command {
            Command::Audio {
                job_id,
                block,
                output,
            } => {
                assert_eq!(job_id, "j1");
                assert_eq!(block, Some(2));
                assert_eq!(output, PathBuf::from("b.wav"));
            }
            _ => panic!("expected Audio command"),
        }
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
