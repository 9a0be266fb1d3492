use vaultindexd::daemon::{DaemonConfig, DaemonRuntime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Rebuild,
    Dedup,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--rebuild" => mode = CliMode::Rebuild,
            "--dedup" => mode = CliMode::Dedup,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: vaultindexd [--rebuild | --dedup]");
        println!("  --rebuild  Clear tracked state, re-enqueue the whole vault, and exit");
        println!("  --dedup    Remove duplicate and stale remote documents, then exit");
        return Ok(());
    }

    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    match mode {
        CliMode::Rebuild => {
            let controller = daemon.controller();
            let summary = controller.rebuild_index().await?;
            eprintln!(
                "[vaultindexd] rebuild queued: {} uploads, {} deletes ({} files scanned)",
                summary.queued_uploads, summary.queued_deletes, summary.scanned
            );
            daemon.drain_queue().await;
            Ok(())
        }
        CliMode::Dedup => {
            let controller = daemon.controller();
            let report = controller
                .run_deduplication(|progress| {
                    eprintln!(
                        "[vaultindexd] dedup: {:?} {}/{}",
                        progress.phase, progress.current, progress.total
                    );
                })
                .await?;
            eprintln!(
                "[vaultindexd] dedup finished: {} removed of {} remote documents",
                report.total_removed, report.total_remote_documents
            );
            Ok(())
        }
        _ => daemon.run().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(vec!["vaultindexd".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Run);
    }

    #[test]
    fn parse_cli_mode_supports_rebuild() {
        let mode = parse_cli_mode(vec!["vaultindexd".to_string(), "--rebuild".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Rebuild);
    }

    #[test]
    fn parse_cli_mode_supports_dedup() {
        let mode = parse_cli_mode(vec!["vaultindexd".to_string(), "--dedup".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Dedup);
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_arguments() {
        assert!(parse_cli_mode(vec!["vaultindexd".to_string(), "--bogus".to_string()]).is_err());
    }
}
