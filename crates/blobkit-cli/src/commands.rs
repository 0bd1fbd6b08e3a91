use anyhow::{bail, Context};
use blobkit::{CallContext, StoreConfig, StoreFactory, StoreOptions};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut cx = CallContext::with_cancel(cancel);
    if let Some(trace_id) = cli.trace_id {
        cx = cx.with_trace_id(trace_id);
    }

    let factory = StoreFactory::new();
    match cli.command {
        Command::Copy(args) => cmd_copy(&factory, &cx, args).await,
        Command::List(args) => cmd_list(&factory, &cx, args).await,
    }
}

fn config() -> StoreConfig {
    StoreConfig::new(StoreOptions::simple())
}

/// Split an object URL into its containing location and the object name.
fn split_object_url(url: &str) -> anyhow::Result<(&str, &str)> {
    let (location, name) = match url.rsplit_once('/') {
        Some((location, name)) if !location.ends_with(':') && !location.ends_with('/') => {
            (location, name)
        }
        Some(_) => bail!("{url:?} names a location, not an object"),
        None => (".", url),
    };
    if name.is_empty() {
        bail!("{url:?} does not end with an object name");
    }
    Ok((location, name))
}

async fn cmd_copy(factory: &StoreFactory, cx: &CallContext, args: CopyArgs) -> anyhow::Result<()> {
    let (source_location, name) = split_object_url(&args.source)?;
    debug!(source = source_location, object = name, destination = %args.destination, "copying object");

    let source = factory
        .open_str(source_location, config())
        .await
        .with_context(|| format!("opening source {source_location}"))?;
    let destination = factory
        .open_str(&args.destination, config())
        .await
        .with_context(|| format!("opening destination {}", args.destination))?;

    let mut reader = source
        .open_object(cx, name)
        .await
        .with_context(|| format!("reading {}", source.object_url(name)))?;
    destination
        .write_object(cx, name, &mut reader)
        .await
        .with_context(|| format!("writing {}", destination.object_url(name)))?;

    println!(
        "{} {} -> {}",
        "✓".green().bold(),
        source.object_url(name),
        destination.object_url(name).bold()
    );
    Ok(())
}

async fn cmd_list(factory: &StoreFactory, cx: &CallContext, args: ListArgs) -> anyhow::Result<()> {
    let store = factory
        .open_str(&args.location, config())
        .await
        .with_context(|| format!("opening {}", args.location))?;

    let names = store.list_files(cx, &args.prefix, args.max).await?;
    for name in &names {
        println!("{name}");
    }
    eprintln!("{} {} objects", "total".dimmed(), names.len().to_string().bold());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_object_urls() {
        assert_eq!(split_object_url("s3://bucket/a/obj").unwrap(), ("s3://bucket/a", "obj"));
        assert_eq!(split_object_url("/tmp/data/obj").unwrap(), ("/tmp/data", "obj"));
        assert_eq!(split_object_url("obj").unwrap(), (".", "obj"));
        assert!(split_object_url("s3://bucket").is_err());
        assert!(split_object_url("/tmp/data/").is_err());
    }

    #[tokio::test]
    async fn copies_between_local_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("obj"), b"payload").unwrap();
        let dest = dir.path().join("dest");

        let factory = StoreFactory::new();
        let args = CopyArgs {
            source: format!("{}/obj", src.display()),
            destination: dest.display().to_string(),
        };
        cmd_copy(&factory, &CallContext::new(), args).await.unwrap();

        assert_eq!(std::fs::read(dest.join("obj")).unwrap(), b"payload");
    }
}
