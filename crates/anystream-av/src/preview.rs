//! Seek-preview thumbnails.

use std::path::Path;
use std::time::Duration;

use anystream_core::{Error, Result};

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// One thumbnail every this many seconds.
const PREVIEW_INTERVAL_SECS: u32 = 5;

/// Write `preview<N>.jpg` thumbnails (240px wide, one per 5 seconds) for
/// `input` into `output_dir` and return how many were produced.
pub async fn generate_previews(
    tools: &ToolRegistry,
    input: &Path,
    output_dir: &Path,
) -> Result<usize> {
    let ffmpeg = tools.require("ffmpeg")?;

    tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
        Error::Internal(format!(
            "failed to create preview dir {}: {e}",
            output_dir.display()
        ))
    })?;

    tracing::info!(
        input = %input.display(),
        output_dir = %output_dir.display(),
        "Generating previews"
    );

    let mut cmd = ToolCommand::new(ffmpeg.path.clone());
    cmd.timeout(Duration::from_secs(3600));
    cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-i"]);
    cmd.arg(input.to_string_lossy().as_ref());
    cmd.args([
        "-vf",
        &format!("fps=fps=1/{PREVIEW_INTERVAL_SECS},scale=240:-1"),
    ]);
    cmd.args(["-q:v", "5"]);
    cmd.arg(output_dir.join("preview%d.jpg").to_string_lossy().as_ref());
    cmd.execute().await?;

    count_previews(output_dir).await
}

async fn count_previews(dir: &Path) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("preview") && name.ends_with(".jpg") {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requires_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let err = generate_previews(&ToolRegistry::default(), Path::new("/m/a.mkv"), dir.path())
            .await
            .unwrap_err();
        assert!(err.is_external_tool());
    }

    #[tokio::test]
    async fn counts_only_preview_images() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["preview1.jpg", "preview2.jpg", "other.jpg", "preview.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert_eq!(count_previews(dir.path()).await.unwrap(), 2);
    }
}
