//! Output helpers for the control tool

use std::time::Duration;

/// Format a duration as a human-readable string
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();

    if total_secs < 60 {
        format!("{}.{:03}s", total_secs, duration.subsec_millis())
    } else if total_secs < 3600 {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    } else if total_secs < 86_400 {
        format!("{}h {}m {}s", total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60)
    } else {
        format!("{}d {}h {}m", total_secs / 86_400, (total_secs % 86_400) / 3600, (total_secs % 3600) / 60)
    }
}

/// Format a byte count as a human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    }
}

/// Print a section header in the CLI output
pub fn print_header(title: &str) {
    println!("\n{}", title);
    println!("{}", "=".repeat(title.len()));
}

/// Face list as `1,2,3`, or `-` when empty
pub fn face_list(faces: &[u16]) -> String {
    if faces.is_empty() {
        return "-".to_string();
    }
    faces.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(",")
}
