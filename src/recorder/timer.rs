/// Render elapsed recording time as `SS:CC` (seconds, then centiseconds)
pub fn format_elapsed(elapsed_ms: u64) -> String {
    let seconds = elapsed_ms / 1000;
    let centis = (elapsed_ms % 1000) / 10;
    format!("{:02}:{:02}", seconds, centis)
}
