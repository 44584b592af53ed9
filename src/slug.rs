//! Deployment naming.
//!
//! Every identifier downstream — compose project name, nginx config filename,
//! tracker key, working-tree path — derives from the project slug, so this is
//! the only place that sanitizes forge-supplied names.

/// Lowercase `<owner>/<name>` with runs of non-alphanumerics collapsed to a
/// single `-` and leading/trailing `-` trimmed.
pub fn project_slug(owner: &str, name: &str) -> String {
    let raw = format!("{owner}/{name}").to_lowercase();
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    out
}

/// `<slug>-<pr>` — the primary key across tracker, proxy, compose, and disk.
pub fn deployment_id(slug: &str, pr_number: u64) -> String {
    format!("{slug}-{pr_number}")
}

/// Per-PR directory name under the project slug: `pr-<N>`.
pub fn work_dir_name(pr_number: u64) -> String {
    format!("pr-{pr_number}")
}
