use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::json;

use super::acceptance::{AcceptanceLoop, FilterSettings, LoopReport, LoopSettings};
use super::cli::{BuildArgs, CheckArgs, DeriveArgs, MappingCommands, PolicyArgs, SrtArgs};
use super::config::MontageConfig;
use super::effects::{Identity, SpeedRamp, TimeRemap};
use super::features::{CommandDetector, PointSource, PointsFile, SceneCutDetector, collect_points};
use super::logging::log_event;
use super::mapping::{
    Mapping, MappingStore, Resource, format_mapping, is_complete, is_url, load, read_subtitles,
    save, truncate_mappings, write_subtitles,
};
use super::render::{
    AssemblyMode, AssemblyOptions, AssemblyOutcome, Assembler, Canvas, FfmpegRenderer,
    OutputLayout, OutputSink, Renderer,
};
use super::sources::{
    InputRestrictions, MediaCache, SelectionMode, SourceSelector, SystemResolver,
    VideoConstraints, build_pool, expand_playlists,
};
use super::timepoints::{BoundaryPolicy, derive_boundaries, intervals_from_boundaries};
use super::timestamp::{format_timestamp, parse_timestamp};
use crate::common::paths;
use crate::common::progress::{create_spinner, finish_spinner_with_success};
use crate::ui::prelude::*;
use crate::ui::reserve_stdout;

pub fn handle_mapping_command(command: MappingCommands) -> Result<()> {
    match command {
        MappingCommands::Check(args) => handle_check(args),
        MappingCommands::Srt(args) => handle_srt(args),
        MappingCommands::Derive(args) => handle_derive(args),
    }
}

pub fn handle_config() -> Result<()> {
    let path = paths::config_file_path()?;
    let config = MontageConfig::load_from_path(&path)?;
    let rendered = toml::to_string_pretty(&config).context("serializing config")?;
    emit(
        Level::Info,
        "montage.config.path",
        &format!("{}", path.display()),
        Some(json!({ "path": path })),
    );
    if get_output_format() == OutputFormat::Text {
        println!("{rendered}");
    }
    Ok(())
}

fn handle_check(args: CheckArgs) -> Result<()> {
    if !args.file.exists() {
        bail!("Mappings file {} does not exist", args.file.display());
    }
    let mappings = load(&args.file)?;
    let stats = MappingStats::of(&mappings);

    emit(
        Level::Success,
        "montage.mappings.valid",
        &format!(
            "{}: {} mapping(s), {} resolved, {} source(s), {} long{}",
            args.file.display(),
            stats.count,
            stats.resolved,
            stats.sources,
            format_timestamp(stats.length),
            if stats.complete { "" } else { " (incomplete)" }
        ),
        Some(json!({
            "file": args.file,
            "count": stats.count,
            "resolved": stats.resolved,
            "complete": stats.complete,
            "sources": stats.sources,
            "length": stats.length,
            "shortest": stats.shortest,
            "longest": stats.longest,
        })),
    );
    if stats.count > 0 {
        log_event(
            Level::Info,
            "montage.mappings.intervals",
            format!(
                "Intervals between {:.3}s and {:.3}s",
                stats.shortest, stats.longest
            ),
        );
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct MappingStats {
    count: usize,
    resolved: usize,
    complete: bool,
    sources: usize,
    length: f64,
    shortest: f64,
    longest: f64,
}

impl MappingStats {
    fn of(mappings: &[Mapping]) -> Self {
        let mut ids: Vec<&str> = mappings.iter().filter_map(|m| m.source.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        let durations = mappings.iter().map(Mapping::duration);
        Self {
            count: mappings.len(),
            resolved: mappings.iter().filter(|m| m.source.is_resolved()).count(),
            complete: !mappings.is_empty() && is_complete(mappings),
            sources: ids.len(),
            length: mappings.last().map(|m| m.target.final_).unwrap_or(0.0),
            shortest: durations.clone().reduce(f64::min).unwrap_or(0.0),
            longest: durations.fold(0.0, f64::max),
        }
    }
}

fn handle_srt(args: SrtArgs) -> Result<()> {
    let mappings = load(&args.file)?;
    if mappings.is_empty() {
        bail!("No mappings found in {}", args.file.display());
    }
    let out = args
        .out_file
        .unwrap_or_else(|| args.file.with_extension("srt"));
    write_subtitles(&out, &mappings)?;
    emit(
        Level::Success,
        "montage.mappings.srt",
        &format!("Wrote {} cue(s) to {}", mappings.len(), out.display()),
        Some(json!({ "path": out, "count": mappings.len() })),
    );
    Ok(())
}

fn policy_from_args(args: &PolicyArgs, config: Option<&MontageConfig>) -> Result<BoundaryPolicy> {
    Ok(BoundaryPolicy {
        max_length: args
            .output_length
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
        joints: args.joints.unwrap_or(0),
        splits: args.splits.unwrap_or(0),
        max_interval: args.max_interval,
        min_interval: args.min_interval.or(config.map(|c| c.min_interval)),
    })
}

fn handle_derive(args: DeriveArgs) -> Result<()> {
    let total = parse_timestamp(&args.duration)?;
    let raw = PointsFile::new(&args.points).detect("")?;
    let policy = policy_from_args(&args.policy, None)?;
    let mappings = intervals_from_boundaries(&derive_boundaries(&raw, total, &policy));
    if mappings.is_empty() {
        bail!("No intervals could be derived from {}", args.points.display());
    }

    match &args.out_file {
        Some(path) => {
            save(path, &mappings)?;
            emit(
                Level::Success,
                "montage.mappings.derived",
                &format!("Wrote {} mapping(s) to {}", mappings.len(), path.display()),
                Some(json!({ "path": path, "count": mappings.len() })),
            );
        }
        None => {
            for mapping in &mappings {
                print!("{}", format_mapping(mapping));
            }
        }
    }
    Ok(())
}

/// External tools a build shells out to.
fn require_tools(remote: bool) -> Result<()> {
    let mut tools = vec!["ffmpeg", "ffprobe"];
    if remote {
        tools.push("yt-dlp");
    }
    for tool in tools {
        which::which(tool).with_context(|| format!("{tool} was not found in PATH"))?;
    }
    Ok(())
}

fn output_format(args: &BuildArgs, sinks: &[OutputSink]) -> String {
    match &args.output_format {
        Some(format) => format.clone(),
        None if sinks.iter().any(OutputSink::is_stream) => "flv".to_string(),
        None => "mp4".to_string(),
    }
}

fn filter_settings(args: &BuildArgs, config: &MontageConfig) -> FilterSettings {
    FilterSettings {
        dark: args.filter_dark,
        cuts: args.filter_cuts,
        cuts_threshold: config.filters.cuts_threshold,
        pace: args.filter_pace,
        pace_threshold: config.filters.pace_threshold,
        pace_rate: config.filters.pace_rate,
        face: args.filter_face,
        face_command: config.filters.face_command.clone(),
        text: args.filter_text,
        text_command: config.filters.text_command.clone(),
        order: args.filter_order.clone(),
    }
}

/// Target intervals for a fresh store: subtitles, scene cuts of a video, or points found in
/// the audio.
fn derive_mappings(
    args: &BuildArgs,
    config: &MontageConfig,
    renderer: &dyn Renderer,
    media: &MediaCache,
) -> Result<Vec<Mapping>> {
    let policy = policy_from_args(&args.policy, Some(config))?;

    if let Some(subs) = &args.mappings_from_subs {
        let mut mappings = read_subtitles(subs)?;
        if let Some(max) = policy.max_length {
            truncate_mappings(&mut mappings, max);
        }
        return Ok(mappings);
    }

    let (media_url, total, sources): (String, f64, Vec<Box<dyn PointSource>>) =
        if let Some(video) = &args.mappings_from_video {
            let handle = media.resolve(video)?;
            let sources: Vec<Box<dyn PointSource>> = vec![Box::new(SceneCutDetector::new(
                config.detector.scene_threshold,
            ))];
            (handle.playable_url, handle.duration, sources)
        } else {
            let audio = args
                .audio
                .as_ref()
                .context("--audio is required to derive mappings")?;
            let audio = audio.to_string_lossy().into_owned();
            let total = renderer.probe(&audio)?;
            let mut sources: Vec<Box<dyn PointSource>> = args
                .points
                .iter()
                .map(|p| Box::new(PointsFile::new(p)) as Box<dyn PointSource>)
                .collect();
            if let Some(command) = args.detector.as_ref().or(config.detector.command.as_ref()) {
                sources.push(Box::new(CommandDetector::parse(command)?));
            }
            (audio, total, sources)
        };

    let spinner = create_spinner("Detecting boundary points".to_string());
    let raw = collect_points(&sources, &media_url)?;
    finish_spinner_with_success(spinner, format!("Found {} boundary point(s)", raw.len()));

    let mappings = intervals_from_boundaries(&derive_boundaries(&raw, total, &policy));
    log_event(
        Level::Info,
        "montage.mappings.derived",
        format!(
            "{} point(s) became {} interval(s)",
            raw.len(),
            mappings.len()
        ),
    );
    Ok(mappings)
}

/// Video identifiers to draw from: expanded inputs plus sources already referenced by the store.
fn pool_items(args: &BuildArgs, mappings: &[Mapping], seed: u64) -> Result<Vec<String>> {
    let mut items = expand_playlists(&args.videos)?;
    if let Some(limit) = args.videos_number
        && items.len() > limit
    {
        let mut rng = StdRng::seed_from_u64(seed);
        items.shuffle(&mut rng);
        items.truncate(limit);
    }
    for mapping in mappings {
        if let Resource::Resolved { id, .. } = &mapping.source
            && (Path::new(id).is_file() || is_url(id))
            && !items.contains(id)
        {
            items.push(id.clone());
        }
    }
    Ok(items)
}

fn restrictions(
    args: &BuildArgs,
    config: &MontageConfig,
    media: &MediaCache,
) -> Result<InputRestrictions> {
    let mut restrictions = InputRestrictions::default();
    for arg in &args.ranges {
        restrictions.push_arg(arg)?;
    }
    if args.cuts {
        let detector = SceneCutDetector::new(config.detector.scene_threshold);
        let ids: Vec<String> = restrictions.identifiers().cloned().collect();
        for id in ids {
            let handle = media.resolve(&id)?;
            let cuts = detector.detect(&handle.playable_url)?;
            log_event(
                Level::Debug,
                "montage.sources.cuts",
                format!("{id}: {} cut(s)", cuts.len()),
            );
            restrictions.snap_to_cuts(&id, &cuts);
        }
    }
    Ok(restrictions)
}

pub fn handle_build(args: BuildArgs, config: MontageConfig) -> Result<()> {
    let sinks: Vec<OutputSink> = args.outputs.iter().map(|o| OutputSink::parse(o)).collect();
    if sinks.contains(&OutputSink::Stdout) {
        reserve_stdout();
    }
    let remote = args
        .videos
        .iter()
        .any(|v| is_url(v) || v.starts_with("ytsearch") || v.starts_with("ytdl://"));
    require_tools(remote)?;

    let format = output_format(&args, &sinks);
    let layout = OutputLayout::new(Path::new("."), &args.output_id, &format);
    let store_path: PathBuf = args.mappings.clone().unwrap_or_else(|| layout.store());
    let seed = args.seed.unwrap_or(config.seed);

    let media = MediaCache::new(Box::new(SystemResolver::new(VideoConstraints {
        format: args.output_format.clone(),
        width: None,
        height: config.videos_height,
    })));
    let renderer = FfmpegRenderer::default();

    let previous = load(&store_path)?;
    let mut mappings = if previous.is_empty() {
        derive_mappings(&args, &config, &renderer, &media)?
    } else {
        let mut mappings = previous.clone();
        if args.mappings_reinit {
            for mapping in &mut mappings {
                mapping.source = Resource::Unset;
            }
        }
        mappings
    };
    if let Some(max) = policy_from_args(&args.policy, Some(&config))?.max_length {
        truncate_mappings(&mut mappings, max);
    }
    if mappings.is_empty() {
        bail!("No target intervals; check the audio, points and policy options");
    }

    let items = pool_items(&args, &mappings, seed)?;
    let pool = build_pool(&items, &media, restrictions(&args, &config, &media)?)?;
    if pool.is_empty() && !is_complete(&mappings) {
        bail!("No usable source videos");
    }
    log_event(
        Level::Info,
        "montage.sources.pool",
        format!("{} source(s) available", pool.len()),
    );

    let mode = if args.chrono {
        SelectionMode::Chronological {
            speed: args.chrono_speed.unwrap_or(config.chrono.speed),
            scope: args.chrono_scope.unwrap_or(config.chrono.scope),
        }
    } else {
        SelectionMode::Random
    };
    let selector = SourceSelector::new(&pool, mode, mappings.len());
    let predicate = filter_settings(&args, &config).build()?;
    if !predicate.is_empty() {
        log_event(
            Level::Debug,
            "montage.accept.filters",
            format!("Filters: {}", predicate.names().join(", ")),
        );
    }

    let subtitles = args.output_subtitles.then(|| layout.subtitles());
    let store = MappingStore::new(&store_path, mappings).with_subtitles(subtitles);
    store.persist()?;

    let assembly = AssemblyOptions {
        mode: AssemblyMode::from_flags(args.reencode, args.increment),
        layout,
        sinks,
        audio: args.audio.clone(),
        max_length: policy_from_args(&args.policy, Some(&config))?.max_length,
        canvas: args
            .output_width
            .zip(args.output_height)
            .map(|(width, height)| Canvas { width, height }),
        quality: args.quality.unwrap_or(config.quality),
        reencode_offset: config.offsets.reencode,
        increment_offset: config.offsets.increment,
        mixed_offset: config.offsets.mixed,
    };

    let remap: Box<dyn TimeRemap> = if args.speedup {
        let bpm = args.speedup_bpm.unwrap_or(config.speedup.bpm);
        let freq = args.speedup_freq.unwrap_or(config.speedup.freq);
        let ramp = SpeedRamp::from_tempo(bpm, freq)
            .with_context(|| format!("Invalid speed-up tempo {bpm} bpm x {freq}"))?;
        if assembly.mode != AssemblyMode::Reencode {
            log_event(
                Level::Warn,
                "montage.effects.ignored",
                "The speed ramp only applies to full re-encodes",
            );
        }
        Box::new(ramp)
    } else {
        Box::new(Identity)
    };

    let assembler = Assembler::new(&renderer, &media, remap.as_ref(), &assembly);
    let settings = LoopSettings {
        retries: args.retries.unwrap_or(config.retries),
        threads: args.threads.unwrap_or(config.threads),
        seed,
    };
    let report = AcceptanceLoop::new(
        &store,
        &selector,
        &predicate,
        &media,
        assembly.mode.uses_cache().then_some(&assembler),
        settings,
    )
    .run()?;
    report_loop(&report, store.path());

    if args.dry_run {
        log_event(
            Level::Info,
            "montage.assemble.skipped",
            "Dry run; not rendering output",
        );
        return Ok(());
    }

    let current = store.snapshot()?;
    match assembler.assemble(&current, &previous)? {
        AssemblyOutcome::Written => emit(
            Level::Success,
            "montage.assemble.written",
            &format!("Wrote {}", assembly.layout.whole().display()),
            Some(json!({ "path": assembly.layout.whole(), "mappings": current.len() })),
        ),
        AssemblyOutcome::Unchanged => log_event(
            Level::Success,
            "montage.assemble.unchanged",
            "Output already up to date",
        ),
        AssemblyOutcome::Incomplete => bail!("Mappings are incomplete; nothing was rendered"),
    }
    Ok(())
}

fn report_loop(report: &LoopReport, store: &Path) {
    emit(
        Level::Success,
        "montage.accept.done",
        &format!(
            "{} kept, {} accepted, {} forced ({} candidate(s)); saved {}",
            report.kept,
            report.accepted,
            report.forced,
            report.proposals,
            store.display()
        ),
        Some(json!({
            "kept": report.kept,
            "accepted": report.accepted,
            "forced": report.forced,
            "proposals": report.proposals,
            "store": store,
        })),
    );
}
