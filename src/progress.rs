//! Progress bars for the long running loops of the toolkit, built on the `indicatif` crate.
//!
//! Bars are drawn to stderr next to the log output and are hidden automatically when
//! stderr is not a terminal.

use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str =
    "[{elapsed_precise}] {bar:40.cyan/blue} {percent}% [{human_pos}/{human_len}] [Remaining: {eta}]";

const BAR_MSG_TEMPLATE: &str =
    "[{elapsed_precise}] {bar:20.cyan/blue} {percent}% [{human_pos}/{human_len}] [Remaining: {eta}] [{msg}]";

fn styled_bar(len: u64, template: &str) -> ProgressBar {
    let progress_bar = ProgressBar::new(len);
    progress_bar.set_style(ProgressStyle::default_bar().template(template).expect("Invalid progress style."));

    progress_bar
}

/// Progress bar over a known number of steps, e.g. the fold-changes of a curve.
pub fn progress_bar(len: u64) -> ProgressBar {
    styled_bar(len, BAR_TEMPLATE)
}

/// Progress bar that also shows the item currently being processed.
pub fn progress_bar_msg(len: u64) -> ProgressBar {
    styled_bar(len, BAR_MSG_TEMPLATE)
}
