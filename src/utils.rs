use indicatif::ProgressStyle;

/// 长度未知时使用的进度条样式
pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {pos} ({per_sec}) {msg}")
        .expect("invalid progress bar template")
}
