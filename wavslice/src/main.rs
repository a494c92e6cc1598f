mod cli;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use indicatif::{HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::debug;
use wavslice_core::{plan_file, split_file_with_progress, Config, OutputKind, ProgressEvent};

use crate::cli::build_cli;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = build_cli().get_matches();

    let input_path = matches
        .get_one::<PathBuf>("file_path")
        .context("missing input path")?;
    if !input_path.is_file() {
        return Err(anyhow!(
            "input file does not exist: {}",
            input_path.display()
        ));
    }

    let chunk_length = *matches
        .get_one::<Duration>("length")
        .context("missing chunk length")?;
    let overlap = matches
        .get_one::<Duration>("overlap")
        .copied()
        .unwrap_or_default();
    let bitrate = *matches
        .get_one::<u32>("bitrate")
        .context("missing bitrate")?;
    let encoder = matches
        .get_one::<PathBuf>("encoder")
        .context("missing encoder program")?;
    let dry_run = matches.get_flag("dry-run");

    let mut builder = Config::builder(chunk_length)
        .overlap(overlap)
        .compress(!matches.get_flag("no-compress"))
        .generate_canonical_header(!matches.get_flag("raw-header"))
        .bitrate(bitrate)
        .overwrite(matches.get_flag("overwrite"))
        .encoder_program(encoder);
    if let Some(dir) = matches.get_one::<PathBuf>("output") {
        builder = builder.output_dir(dir);
    }
    if let Some(threads) = matches.get_one::<NonZeroUsize>("threads") {
        builder = builder.threads(*threads);
    }
    let config = builder.build().with_context(|| {
        format!(
            "failed to create configuration for '{}'",
            input_path.display()
        )
    })?;
    debug!("{config:?}");

    if dry_run {
        let plan = plan_file(input_path, &config)
            .with_context(|| format!("failed to plan chunks for '{}'", input_path.display()))?;

        if plan.is_empty() {
            println!("Dry run: no chunks would be generated.");
        } else {
            println!("Dry run: would generate {} chunk(s):", plan.len());
            for chunk in plan {
                println!(
                    "  {} ({:.3}s +{:.3}s)",
                    chunk.path.display(),
                    chunk.window.nominal_start.as_secs_f64(),
                    chunk.window.nominal_duration.as_secs_f64()
                );
            }
        }

        return Ok(());
    }

    let progress = ProgressBar::new(0);
    progress.set_draw_target(ProgressDrawTarget::stderr());
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let progress_handle = progress.clone();
    let result = split_file_with_progress(input_path, &config, move |event| match event {
        ProgressEvent::Start {
            chunks,
            total_duration,
        } => {
            progress_handle.set_length(chunks as u64);
            progress_handle.set_message(format!("of {}", HumanDuration(total_duration)));
            progress_handle.enable_steady_tick(Duration::from_millis(100));
        }
        ProgressEvent::ChunkDone { .. } => progress_handle.inc(1),
        ProgressEvent::Finish => progress_handle.set_message("done"),
    })
    .with_context(|| format!("failed to split '{}'", input_path.display()));

    progress.finish_and_clear();
    let manifest = result?;

    if let Some(path) = matches.get_one::<PathBuf>("manifest") {
        let file = File::create(path)
            .with_context(|| format!("failed to create manifest '{}'", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &manifest.entries)
            .with_context(|| format!("failed to write manifest '{}'", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("failed to write manifest '{}'", path.display()))?;
    }

    let kind = match manifest.output {
        OutputKind::Compressed { bitrate } => format!("mp3 @ {bitrate} kbit/s"),
        OutputKind::Raw => String::from("wav"),
    };
    println!("Wrote {} chunk(s) ({kind}).", manifest.entries.len());

    Ok(())
}
