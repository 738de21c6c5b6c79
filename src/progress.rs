use indicatif::{ProgressBar, ProgressStyle};

use tilemosaic::FetchProgress;

/// Progress bar for tile downloads; an empty retrieval gets a hidden bar.
pub fn tile_progress_bar(total: usize, label: &str) -> ProgressBar {
    if total == 0 {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{prefix:.bold} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} eta {eta_precise} {msg}",
    ) {
        pb.set_style(style.progress_chars("##-"));
    }
    pb.set_prefix(label.to_string());
    pb
}

/// Advances `pb` by one tile. Reports from parallel workers may arrive out
/// of order, so `report.completed` is not used as the position.
pub fn apply_report(pb: &ProgressBar, report: FetchProgress) {
    pb.inc(1);
    let source = if report.cached { "cached" } else { "fetched" };
    pb.set_message(format!(
        "{source} row {} col {}",
        report.tile.row, report.tile.col
    ));
}
