mod styling;
mod summary;
mod tables;

pub use styling::{classification_label, dim, magenta_bold};
pub use summary::print_report;

/// Prints the ciscope banner to stderr.
///
/// Displays the tool name, version, and description at the start of
/// execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🔬 ciscope"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("CI Pipeline Analysis Engine")
    );
}
