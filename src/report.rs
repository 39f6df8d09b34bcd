use std::io::Write;
use std::path::Path;

use anyhow::Result;
use clap::ValueEnum;
use serde_json::json;

use crate::engine::{RunStats, SearchOutcome};
use crate::ranker::SimilarityScore;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// 渲染排序结果
pub fn render_table(ranking: &[SimilarityScore]) -> String {
    if ranking.is_empty() {
        return "No similar images found.\n".to_string();
    }
    let mut out = String::from("Top similar images found:\n");
    for item in ranking {
        out.push_str(&format!("{} - Similarity: {:.4}\n", item.path.display(), item.score));
    }
    out
}

pub fn render_json(query: &Path, outcome: &SearchOutcome) -> Result<String> {
    let failed = outcome
        .stats
        .failed
        .iter()
        .map(|(path, reason)| json!({ "path": path, "reason": reason }))
        .collect::<Vec<_>>();
    let value = json!({
        "query": query,
        "result": outcome.ranking,
        "scanned": outcome.stats.scanned,
        "failed": failed,
    });
    Ok(serde_json::to_string_pretty(&value)?)
}

/// 运行摘要，输出到 stderr
pub fn summary(stats: &RunStats) -> String {
    format!(
        "Scanned {} images ({} from cache), {} skipped.",
        stats.scanned,
        stats.cached,
        stats.failed.len()
    )
}

/// 将搜索结果输出到 `out`，摘要输出到 `err`
pub fn print_result<W, E>(
    format: OutputFormat,
    query: &Path,
    outcome: &SearchOutcome,
    out: &mut W,
    err: &mut E,
) -> Result<()>
where
    W: Write,
    E: Write,
{
    match format {
        OutputFormat::Table => {
            write!(out, "{}", render_table(&outcome.ranking))?;
            writeln!(err, "{}", summary(&outcome.stats))?;
        }
        OutputFormat::Json => writeln!(out, "{}", render_json(query, outcome)?)?,
    }
    Ok(())
}
