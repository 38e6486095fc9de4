//! ffmpeg argument lists for every render the assembler issues.

use std::path::Path;

use anyhow::{Result, bail};

use super::{Canvas, ClipRequest, MuxRequest, OutputSink, TimelineRequest};

fn push(args: &mut Vec<String>, values: &[&str]) {
    args.extend(values.iter().map(|v| v.to_string()));
}

fn canvas_filter(canvas: Canvas) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1",
        w = canvas.width,
        h = canvas.height
    )
}

/// Audio codec matching the output container.
pub(super) fn audio_codec(format: &str) -> &'static str {
    match format {
        "mp4" | "mov" | "m4v" | "mkv" => "aac",
        "webm" => "libopus",
        _ => "libmp3lame",
    }
}

/// Single sink: the plain muxer. Several sinks: the `tee` muxer duplicating one encode.
fn sink_args(args: &mut Vec<String>, format: &str, sinks: &[OutputSink]) -> Result<()> {
    match sinks {
        [] => bail!("no output sink configured"),
        [sink] => {
            push(args, &["-f", format]);
            args.push(sink.target());
        }
        sinks => {
            push(args, &["-f", "tee"]);
            args.push(
                sinks
                    .iter()
                    .map(|s| format!("[f={format}]{}", s.target()))
                    .collect::<Vec<_>>()
                    .join("|"),
            );
        }
    }
    Ok(())
}

pub(super) fn clip_args(clip: &ClipRequest) -> Vec<String> {
    let mut args = Vec::new();
    push(
        &mut args,
        &[
            "-hide_banner",
            "-y",
            "-ss",
            &format!("{:.3}", clip.start),
            "-t",
            &format!("{:.3}", clip.duration.max(0.0)),
            "-i",
            &clip.url,
        ],
    );
    if let Some(canvas) = clip.canvas {
        push(&mut args, &["-vf", &canvas_filter(canvas)]);
    }
    push(&mut args, &["-c:v", "libx264"]);
    args.extend(clip.quality.encoder_args());
    push(&mut args, &["-an"]);
    args.push(clip.output.to_string_lossy().into_owned());
    args
}

pub(super) fn timeline_args(request: &TimelineRequest) -> Result<Vec<String>> {
    if request.inputs.is_empty() {
        bail!("timeline has no inputs");
    }

    let mut args = Vec::new();
    push(&mut args, &["-hide_banner", "-y"]);
    for input in &request.inputs {
        push(
            &mut args,
            &[
                "-ss",
                &format!("{:.3}", input.start),
                "-t",
                &format!("{:.3}", input.duration.max(0.0)),
                "-i",
                &input.url,
            ],
        );
    }
    if let Some(audio) = &request.audio {
        args.push("-i".to_string());
        args.push(audio.to_string_lossy().into_owned());
    }

    push(&mut args, &["-filter_complex", &timeline_filter(request)]);
    push(&mut args, &["-map", "[v]"]);
    if request.audio.is_some() {
        push(&mut args, &["-map", &format!("{}:a", request.inputs.len())]);
    }

    push(
        &mut args,
        &[
            "-t",
            &format!("{:.3}", request.length),
            "-shortest",
            "-fps_mode",
            "vfr",
            "-flags",
            "+global_header",
            "-c:v",
            "libx264",
        ],
    );
    args.extend(request.quality.encoder_args());
    if request.audio.is_some() {
        push(&mut args, &["-c:a", audio_codec(&request.format)]);
    }
    sink_args(&mut args, &request.format, &request.sinks)?;
    Ok(args)
}

fn timeline_filter(request: &TimelineRequest) -> String {
    let count = request.inputs.len();
    let mut chains: Vec<String> = Vec::new();
    let mut labels = String::new();

    for index in 0..count {
        match request.canvas {
            Some(canvas) => {
                chains.push(format!("[{index}:v]{}[c{index}]", canvas_filter(canvas)));
                labels.push_str(&format!("[c{index}]"));
            }
            None => labels.push_str(&format!("[{index}:v]")),
        }
    }

    let concat_out = if request.effect.is_some() { "cat" } else { "v" };
    chains.push(format!("{labels}concat=n={count}:v=1:a=0[{concat_out}]"));
    if let Some(effect) = &request.effect {
        chains.push(format!("[cat]{effect}[v]"));
    }
    chains.join(";")
}

pub(super) fn concat_args(list: &Path, output: &Path) -> Vec<String> {
    let mut args = Vec::new();
    push(
        &mut args,
        &[
            "-hide_banner",
            "-y",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
            &list.to_string_lossy(),
            "-map",
            "0:v",
            "-c",
            "copy",
        ],
    );
    args.push(output.to_string_lossy().into_owned());
    args
}

pub(super) fn mux_args(request: &MuxRequest) -> Result<Vec<String>> {
    let length = format!("{:.3}", request.length);
    let mut args = Vec::new();
    push(&mut args, &["-hide_banner", "-y", "-t", &length, "-i"]);
    args.push(request.video.to_string_lossy().into_owned());
    if let Some(audio) = &request.audio {
        push(&mut args, &["-t", &length, "-i"]);
        args.push(audio.to_string_lossy().into_owned());
    }
    push(&mut args, &["-map", "0:v"]);
    if request.audio.is_some() {
        push(&mut args, &["-map", "1:a"]);
    }
    push(&mut args, &["-c:v", "copy"]);
    if request.audio.is_some() {
        push(&mut args, &["-c:a", audio_codec(&request.format)]);
    }
    push(&mut args, &["-t", &length, "-flags", "+global_header"]);
    sink_args(&mut args, &request.format, &request.sinks)?;
    Ok(args)
}
