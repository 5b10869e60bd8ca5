//! Query command - ranked passages for a question.

use super::{open_engine, preview};
use anyhow::{Context, Result};
use colored::Colorize;
use tokio::runtime::Runtime;

pub fn run(principal: &str, question: &str, kbs: &[String], top_k: Option<usize>) -> Result<()> {
    let (engine, _) = open_engine()?;
    let rt = Runtime::new().context("Failed to create async runtime")?;
    let result = rt.block_on(engine.query(principal, kbs, question, top_k))?;

    println!("{} \"{}\"", "Question:".cyan().bold(), question);
    println!("{}", "─".repeat(70));

    if result.passages.is_empty() {
        println!();
        println!("{}", "No passages found.".dimmed());
        println!();
        println!("Tips:");
        println!("  • Try different keywords");
        println!("  • Check which bases you can read with 'lore kb list'");
        println!("  • Make sure the base has been synced with 'lore sync'");
        return Ok(());
    }

    println!();
    for (i, passage) in result.passages.iter().enumerate() {
        println!(
            "{} {} {} {}",
            format!("{}.", i + 1).white().bold(),
            passage.origin_id.green(),
            format!("[{}]", passage.kb_name).cyan(),
            format!("score {:.3}", passage.score).dimmed()
        );
        println!(
            "   {}",
            format!(
                "chunk {}, bytes {}..{}",
                passage.chunk_index, passage.start, passage.end
            )
            .dimmed()
        );
        println!("   {}", preview(&passage.text, 300));
        println!();
    }

    if result.partial {
        println!(
            "{}",
            "Query timed out; showing the best passages found so far.".yellow()
        );
    }

    Ok(())
}
