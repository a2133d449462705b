//! Saída de terminal: barra de progresso do job e mensagens coloridas.
//!
//! Usa `indicatif` para a barra e `console` para as cores.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use blockvoice::job::{JobStatus, StatusReport};

/// Progresso visual de um job: blocos concluídos sobre o total.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl JobProgress {
    pub fn start(job_id: &str, unit_count: usize) -> Self {
        let pb = ProgressBar::new(unit_count as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_message(job_id.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    pub fn update(&self, report: &StatusReport) {
        self.pb.set_position(report.completed_count as u64);
        self.pb.set_message(format!("{} ({})", report.job_id, report.status));
    }

    pub fn finish(&self, report: &StatusReport) {
        self.pb.finish_and_clear();
        match report.status {
            JobStatus::Completed => {
                println!(
                    "  {} Job {} completed ({} blocks)",
                    self.green.apply_to("✓"),
                    report.job_id,
                    report.unit_count
                );
            }
            _ => {
                let reason = report
                    .failure
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| report.status.to_string());
                println!(
                    "  {} Job {} failed: {reason}",
                    self.red.apply_to("✗"),
                    report.job_id
                );
            }
        }
    }
}

/// Imprime um valor serializável como JSON formatado.
pub fn print_json<T: serde::Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}
