//! Encoder invocation for the synthetic fallback stream.
//!
//! The encoder is an external program (ffmpeg by default) driven entirely
//! through its argument list. Invocations are built here as plain data so
//! the pipeline can spawn them unchanged and tests can point them at a
//! stub program instead.

use std::path::{Path, PathBuf};

use crate::config::Config;

/// One frame per second is plenty for a static card and keeps encode cost low.
const FRAME_RATE: &str = "1";
const VIDEO_BITRATE: &str = "800k";
const VIDEO_BUFSIZE: &str = "1600k";
const AUDIO_BITRATE: &str = "96k";
const MUX_RATE: &str = "900k";

/// Codec support discovered by [`probe`].
///
/// Both flags default to `false`, which selects the broadly compatible
/// MPEG-2 video / MP2 audio pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderCapabilities {
    pub h264: bool,
    pub aac: bool,
}

impl EncoderCapabilities {
    pub fn video_codec(&self) -> &'static str {
        if self.h264 {
            "libx264"
        } else {
            "mpeg2video"
        }
    }

    pub fn audio_codec(&self) -> &'static str {
        if self.aac {
            "aac"
        } else {
            "mp2"
        }
    }
}

/// A fully resolved encoder invocation.
#[derive(Debug, Clone)]
pub struct EncoderCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EncoderCommand {
    /// The invocation as a single printable line, for log output.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Runs the encoder once to discover which codecs it was built with.
///
/// Returns an error only when the program cannot be executed at all; the
/// pipeline treats that as a missing encoder. A probe that runs but exits
/// non-zero yields the default capabilities.
pub async fn probe(program: &Path) -> std::io::Result<EncoderCapabilities> {
    let output = tokio::process::Command::new(program)
        .args(["-v", "0", "-hide_banner", "-encoders"])
        .output()
        .await?;

    if !output.status.success() {
        tracing::warn!(
            program = %program.display(),
            status = %output.status,
            "Encoder probe exited non-zero, assuming baseline codecs"
        );
        return Ok(EncoderCapabilities::default());
    }

    let listing = String::from_utf8_lossy(&output.stdout);
    let caps = EncoderCapabilities {
        h264: lists_encoder(&listing, "libx264"),
        aac: lists_encoder(&listing, "aac"),
    };
    tracing::debug!(
        video = caps.video_codec(),
        audio = caps.audio_codec(),
        "Encoder probe complete"
    );
    Ok(caps)
}

// The listing puts each encoder name on its own line padded with spaces on
// both sides, so a surrounded match avoids hits inside longer names.
fn lists_encoder(listing: &str, name: &str) -> bool {
    listing.contains(&format!(" {name} "))
}

/// Builds the invocation that turns a still image into an MPEG-TS stream
/// on stdout.
///
/// The run is capped with `-t` at twice the saturation TTL; the pipeline
/// restarts the encoder when the cap is reached. The cap must exceed the
/// TTL, otherwise a player can land in a reconnect loop where every
/// segment ends before the saturation record it covers has expired.
pub fn still_image_command(
    config: &Config,
    caps: EncoderCapabilities,
    image: &Path,
) -> EncoderCommand {
    let segment_secs = (config.ttl * 2).as_secs().to_string();

    let mut args: Vec<String> = Vec::with_capacity(48);
    args.extend(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"].map(String::from));
    args.extend(["-loop", "1", "-framerate", FRAME_RATE, "-i"].map(String::from));
    args.push(image.display().to_string());
    args.extend(["-f", "lavfi", "-i", "anullsrc=r=48000:cl=stereo"].map(String::from));
    args.extend(["-c:v", caps.video_codec()].map(String::from));
    if caps.h264 {
        args.extend(["-preset", "ultrafast", "-tune", "stillimage"].map(String::from));
    } else {
        args.extend(["-q:v", "2"].map(String::from));
    }
    args.extend(["-r", FRAME_RATE, "-g", FRAME_RATE, "-keyint_min", FRAME_RATE].map(String::from));
    args.extend(
        [
            "-b:v",
            VIDEO_BITRATE,
            "-maxrate",
            VIDEO_BITRATE,
            "-minrate",
            VIDEO_BITRATE,
            "-bufsize",
            VIDEO_BUFSIZE,
        ]
        .map(String::from),
    );
    args.extend(["-c:a", caps.audio_codec(), "-b:a", AUDIO_BITRATE].map(String::from));
    args.extend(["-muxrate", MUX_RATE, "-fflags", "+genpts"].map(String::from));
    args.extend(["-mpegts_flags", "+resend_headers+initial_discontinuity"].map(String::from));
    args.extend(["-t", &segment_secs, "-f", "mpegts", "pipe:1"].map(String::from));

    EncoderCommand {
        program: config.encoder_program.clone(),
        args,
    }
}
