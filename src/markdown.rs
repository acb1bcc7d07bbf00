//! Render a manual as Markdown

use std::fmt::Write;

use crate::manual::Manual;

/// `# title`, then one `## n. headline` section per step with its bound
/// frame (if any) and description.
pub fn render(manual: &Manual) -> String {
    let mut md = format!("# {}\n\n", manual.title);

    for (index, step) in manual.timeline.steps().iter().enumerate() {
        let n = index + 1;
        let _ = write!(md, "## {}. {}\n\n", n, step.headline);

        if let Some(frame) = step.binding.frame() {
            let _ = write!(md, "![Step {}]({})\n\n", n, frame.url);
        }

        let _ = write!(md, "{}\n\n", step.description);
    }

    md
}
