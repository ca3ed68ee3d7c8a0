//! Command Normalization
//!
//! Pure rewriting of the player invocation: substitutes the host window
//! handle for the `WID` placeholder, injects `--wid=`, and appends a table of
//! mpv defaults without duplicating anything the caller already supplied.
//! Re-running `normalize` on its own output changes nothing.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::error::Error;

/// Literal token callers may put anywhere in their argument vector; every
/// exact occurrence is replaced with the window handle in hex.
pub const WID_PLACEHOLDER: &str = "WID";

/// File extensions recognized in folder mode
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "avi", "mov", "flv"];

/// mpv defaults, as (prefix, fully-formed flag) pairs. A default is appended
/// only when no existing argument starts with its prefix, so user-supplied
/// flags always win. `--input-ipc-server` is handled separately because its
/// value has to be recorded either way.
const DEFAULT_FLAGS: &[(&str, &str)] = &[
    ("--no-osc", "--no-osc"),
    ("--hwdec", "--hwdec=auto"),
    ("--cache", "--cache=yes"),
    ("--cache-secs", "--cache-secs=60"),
    ("--volume", "--volume=0"),
    ("--no-input-default-bindings", "--no-input-default-bindings"),
];

const IPC_FLAG_PREFIX: &str = "--input-ipc-server=";
const LOOP_FLAG_PREFIX: &str = "--loop";

/// Whether the first template token names a player whose defaults we know
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerKind {
    Mpv,
    Other,
}

impl PlayerKind {
    /// Detect from the program token (path or bare name).
    pub fn detect(program: &str) -> Self {
        let basename = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program);
        if basename == "mpv" {
            PlayerKind::Mpv
        } else {
            PlayerKind::Other
        }
    }
}

/// The final argument vector plus the control socket path it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCommand {
    pub argv: Vec<String>,
    pub socket: PathBuf,
}

/// Fixed control socket location, shared by every invocation so a second
/// launch can find the running instance.
pub fn control_socket_path() -> PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));
    PathBuf::from(runtime_dir).join("livewall-mpv.sock")
}

/// Rewrite `template` for window `wid_hex`.
///
/// Order-preserving: original tokens keep their relative positions; injected
/// flags are appended at the tail.
pub fn normalize(
    template: &[String],
    wid_hex: &str,
    kind: PlayerKind,
) -> Result<NormalizedCommand, Error> {
    if template.is_empty() {
        return Err(Error::EmptyCommand);
    }

    let mut argv: Vec<String> = template
        .iter()
        .map(|arg| {
            if arg == WID_PLACEHOLDER {
                wid_hex.to_string()
            } else {
                arg.clone()
            }
        })
        .collect();

    if !argv.iter().any(|a| a.starts_with("--wid=")) {
        argv.push(format!("--wid={wid_hex}"));
    }

    if kind == PlayerKind::Mpv {
        if !argv.iter().any(|a| a.starts_with(LOOP_FLAG_PREFIX)) {
            argv.push(LOOP_FLAG_PREFIX.to_string());
        }

        for (prefix, flag) in DEFAULT_FLAGS {
            if !argv.iter().any(|a| a.starts_with(prefix)) {
                argv.push((*flag).to_string());
            }
        }
    }

    // The socket path is recorded whether or not the flag gets injected; a
    // user-supplied --input-ipc-server= wins over the fixed scheme.
    let socket = match argv
        .iter()
        .find_map(|a| a.strip_prefix(IPC_FLAG_PREFIX))
    {
        Some(user_path) => PathBuf::from(user_path),
        None => {
            let path = control_socket_path();
            if kind == PlayerKind::Mpv {
                argv.push(format!("{IPC_FLAG_PREFIX}{}", path.display()));
            }
            path
        }
    };

    Ok(NormalizedCommand { argv, socket })
}

/// Resolve the media argument, expanding folder mode in place.
///
/// When the second token is a directory, one video file from it is picked
/// (time-seeded) and written back into the template. Returns the media path
/// the running instance should load.
pub fn resolve_media(template: &mut [String]) -> Result<String> {
    if template.len() > 1 {
        let candidate = Path::new(&template[1]);
        if candidate.is_dir() {
            let mut videos: Vec<String> = std::fs::read_dir(candidate)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .and_then(|e| e.to_str())
                            .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                            .unwrap_or(false)
                })
                .map(|p| p.display().to_string())
                .collect();
            if videos.is_empty() {
                bail!("no video files found in {}", candidate.display());
            }
            videos.sort();
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as usize;
            let choice = videos[nanos % videos.len()].clone();
            info!("Picked video from folder: {}", choice);
            template[1] = choice.clone();
            return Ok(choice);
        }
    }

    match template.iter().skip(1).find(|a| !a.starts_with('-')) {
        Some(media) => Ok(media.clone()),
        None => bail!("no video file specified"),
    }
}

/// User-supplied `--vf=` filter specs, in order.
pub fn vf_filters(template: &[String]) -> Vec<String> {
    template
        .iter()
        .filter_map(|a| a.strip_prefix("--vf="))
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_template_is_rejected() {
        let err = normalize(&[], "0x1", PlayerKind::Other).unwrap_err();
        assert!(matches!(err, Error::EmptyCommand));
    }

    #[test]
    fn bare_mpv_invocation_gets_all_defaults() {
        let out = normalize(&args(&["mpv", "video.mp4"]), "0x2600008", PlayerKind::Mpv).unwrap();

        assert_eq!(&out.argv[..2], &args(&["mpv", "video.mp4"])[..]);
        assert!(out.argv.contains(&"--wid=0x2600008".to_string()));
        assert!(out.argv.contains(&"--loop".to_string()));
        assert!(out.argv.contains(&"--no-osc".to_string()));
        assert!(out.argv.contains(&"--hwdec=auto".to_string()));
        assert!(out.argv.contains(&"--cache=yes".to_string()));
        assert!(out.argv.contains(&"--cache-secs=60".to_string()));
        assert!(out.argv.contains(&"--volume=0".to_string()));
        assert!(out.argv.contains(&"--no-input-default-bindings".to_string()));
        assert!(out
            .argv
            .iter()
            .any(|a| a.starts_with("--input-ipc-server=")));
    }

    #[test]
    fn placeholder_is_substituted_everywhere_and_only_there() {
        let template = args(&["mpv", "--log-file=WIDe", "WID", "video.mp4", "WID"]);
        let out = normalize(&template, "0xab", PlayerKind::Other).unwrap();

        assert_eq!(out.argv[1], "--log-file=WIDe"); // not an exact match
        assert_eq!(out.argv[2], "0xab");
        assert_eq!(out.argv[4], "0xab");
        assert_eq!(
            out.argv.iter().filter(|a| a.as_str() == "0xab").count(),
            2
        );
    }

    #[test]
    fn user_loop_flag_wins_over_default() {
        let out = normalize(
            &args(&["mpv", "--loop=no", "video.mp4"]),
            "0x1",
            PlayerKind::Mpv,
        )
        .unwrap();

        assert_eq!(
            out.argv.iter().filter(|a| a.starts_with("--loop")).count(),
            1
        );
        assert!(out.argv.contains(&"--loop=no".to_string()));
    }

    #[test]
    fn user_wid_flag_suppresses_injection() {
        let out = normalize(
            &args(&["mpv", "--wid=0xdead", "video.mp4"]),
            "0xbeef",
            PlayerKind::Mpv,
        )
        .unwrap();

        assert_eq!(
            out.argv.iter().filter(|a| a.starts_with("--wid=")).count(),
            1
        );
        assert!(out.argv.contains(&"--wid=0xdead".to_string()));
    }

    #[test]
    fn user_socket_path_is_parsed_out() {
        let out = normalize(
            &args(&["mpv", "--input-ipc-server=/tmp/custom.sock", "v.mp4"]),
            "0x1",
            PlayerKind::Mpv,
        )
        .unwrap();

        assert_eq!(out.socket, PathBuf::from("/tmp/custom.sock"));
        assert_eq!(
            out.argv
                .iter()
                .filter(|a| a.starts_with("--input-ipc-server="))
                .count(),
            1
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let first = normalize(&args(&["mpv", "WID", "video.mp4"]), "0x42", PlayerKind::Mpv)
            .unwrap();
        let second = normalize(&first.argv, "0x42", PlayerKind::Mpv).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_player_gets_wid_but_no_mpv_defaults() {
        let out = normalize(&args(&["vlc", "video.mp4"]), "0x7", PlayerKind::Other).unwrap();

        assert!(out.argv.contains(&"--wid=0x7".to_string()));
        assert!(!out.argv.iter().any(|a| a.starts_with("--loop")));
        assert!(!out.argv.contains(&"--no-osc".to_string()));
        assert!(!out
            .argv
            .iter()
            .any(|a| a.starts_with("--input-ipc-server=")));
        // The socket path is still recorded for the channel client
        assert_eq!(out.socket, control_socket_path());
    }

    #[test]
    fn player_kind_detects_mpv_by_basename() {
        assert_eq!(PlayerKind::detect("mpv"), PlayerKind::Mpv);
        assert_eq!(PlayerKind::detect("/usr/bin/mpv"), PlayerKind::Mpv);
        assert_eq!(PlayerKind::detect("mpvc"), PlayerKind::Other);
        assert_eq!(PlayerKind::detect("vlc"), PlayerKind::Other);
    }

    #[test]
    fn resolve_media_picks_from_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"").unwrap();

        let mut template = args(&["mpv", dir.path().to_str().unwrap()]);
        let media = resolve_media(&mut template).unwrap();
        assert!(media.ends_with("a.mp4"));
        assert_eq!(template[1], media);
    }

    #[test]
    fn resolve_media_rejects_empty_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut template = args(&["mpv", dir.path().to_str().unwrap()]);
        assert!(resolve_media(&mut template).is_err());
    }

    #[test]
    fn resolve_media_skips_flags() {
        let mut template = args(&["mpv", "--mute=yes", "clip.webm"]);
        assert_eq!(resolve_media(&mut template).unwrap(), "clip.webm");
    }

    #[test]
    fn vf_filters_are_extracted_in_order() {
        let template = args(&["mpv", "--vf=hflip", "v.mp4", "--vf=gradfun"]);
        assert_eq!(vf_filters(&template), vec!["hflip", "gradfun"]);
    }
}
