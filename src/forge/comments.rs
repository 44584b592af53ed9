//! PR comment bodies.
//!
//! Every body starts with the same marker so the daemon can recognize its
//! own comment across restarts, and a stable heading so the updated comment
//! reads as one evolving status rather than a new message per event.

pub const MARKER: &str = "<!-- previewd -->";

pub fn building(commit_sha: &str) -> String {
    format!(
        "{MARKER}\n## Preview environment\n\n\
         :hourglass_flowing_sand: Building preview for `{short}`…\n\n\
         This comment updates in place when the preview is ready.",
        short = short_sha(commit_sha)
    )
}

pub fn success(url: &str, commit_sha: &str) -> String {
    format!(
        "{MARKER}\n## Preview environment\n\n\
         :white_check_mark: Preview for `{short}` is up:\n\n\
         **{url}**\n\n\
         The environment is torn down when this PR closes or its TTL expires.",
        short = short_sha(commit_sha)
    )
}

pub fn failure(commit_sha: &str) -> String {
    format!(
        "{MARKER}\n## Preview environment\n\n\
         :x: Preview build for `{short}` failed. \
         Check the orchestrator logs for details; pushing a new commit retries.",
        short = short_sha(commit_sha)
    )
}

fn short_sha(sha: &str) -> &str {
    if sha.len() >= 7 {
        &sha[..7]
    } else {
        sha
    }
}
