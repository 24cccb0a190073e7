use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;

use hikma_offline::download::{AudioScope, DownloadProgress, DownloadReport, ItemStatus, JobSpec};
use hikma_offline::Engine;

#[derive(Args)]
pub struct DownloadCommand {
    #[command(subcommand)]
    pub target: DownloadTarget,

    /// Re-fetch items that are already cached
    #[arg(long, global = true)]
    pub force: bool,

    /// Only report what would be downloaded
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum DownloadTarget {
    /// Surah text with translation (all 114 unless --surah is given)
    Surahs {
        /// Translation edition (default from config)
        #[arg(long, short)]
        edition: Option<String>,
        /// Surah number (repeatable)
        #[arg(long = "surah", short)]
        surahs: Vec<u32>,
    },
    /// Verse-by-verse recitation audio
    Audio {
        /// Reciter ID (default from config)
        #[arg(long, short)]
        reciter: Option<String>,
        /// Juz number (1-30)
        #[arg(long, short, conflicts_with = "surahs")]
        juz: Option<u32>,
        /// Surah number (repeatable)
        #[arg(long = "surah", short)]
        surahs: Vec<u32>,
    },
    /// Generated stories for every configured prophet, topic and language
    Stories,
    /// Static assets from the configured manifest
    Assets,
}

impl DownloadCommand {
    fn job(&self, engine: &Engine) -> Result<JobSpec, Box<dyn std::error::Error>> {
        let config = &engine.config().download;
        let job = match &self.target {
            DownloadTarget::Surahs { edition, surahs } => {
                let edition = edition.clone().unwrap_or_else(|| config.edition.clone());
                if surahs.is_empty() {
                    JobSpec::all_surahs(edition)
                } else {
                    JobSpec::Surahs {
                        edition,
                        surahs: surahs.clone(),
                    }
                }
            }
            DownloadTarget::Audio {
                reciter,
                juz,
                surahs,
            } => {
                let reciter = reciter.clone().unwrap_or_else(|| config.reciter.clone());
                let scope = match juz {
                    Some(juz) => AudioScope::Juz(*juz),
                    None if !surahs.is_empty() => AudioScope::Surahs(surahs.clone()),
                    None => return Err("audio needs --juz or at least one --surah".into()),
                };
                JobSpec::VerseAudio { reciter, scope }
            }
            DownloadTarget::Stories => JobSpec::Stories {
                prophets: config.prophets.clone(),
                topics: config.topics.clone(),
                languages: config.languages.clone(),
            },
            DownloadTarget::Assets => JobSpec::StaticAssets {
                urls: config.asset_manifest.clone(),
            },
        };
        Ok(job)
    }

    pub async fn run(
        &self,
        engine: &Engine,
        cancel: &CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let job = self.job(engine)?;
        let options = engine.config().download.options(self.force, self.dry_run);

        let mut on_progress = |progress: &DownloadProgress| {
            if progress.status == ItemStatus::Failed || progress.current % 25 == 0 {
                println!(
                    "[{:>3}%] {}/{} {} ({:?})",
                    progress.percent(),
                    progress.current,
                    progress.total,
                    progress.key,
                    progress.status
                );
            }
        };

        let report = engine
            .download(&job, options, &mut on_progress, cancel)
            .await?;
        print_report(&report, self.dry_run);
        Ok(())
    }
}

fn print_report(report: &DownloadReport, dry_run: bool) {
    println!();
    if dry_run {
        println!(
            "Dry run: {} of {} {} item(s) would be downloaded, {} already cached.",
            report.would_download, report.total, report.kind, report.skipped
        );
        return;
    }

    println!(
        "{} downloaded, {} skipped, {} failed (of {})",
        report.downloaded,
        report.skipped,
        report.failed.len(),
        report.total
    );
    for failed in &report.failed {
        println!("  ✗ {}: {}", failed.key, failed.error);
    }
    if report.cancelled {
        println!("Cancelled after {} item(s). Run again to resume.", report.processed());
    } else if !report.failed.is_empty() {
        println!("Run the same command again to retry failed items.");
    }
}
