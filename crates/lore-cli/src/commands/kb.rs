//! Knowledge base management commands.

use super::{format_size, open_engine};
use anyhow::{Context, Result};
use colored::Colorize;
use lore_core::{AccessMode, KnowledgeBase};
use tokio::runtime::Runtime;

pub fn create(principal: &str, name: &str) -> Result<()> {
    let (engine, _) = open_engine()?;
    let kb = engine.create_kb(principal, name)?;

    println!("{} {}", "Created:".green().bold(), kb.name);
    println!("  ID: {}", kb.id);
    println!("  Owner: {}", kb.policy.owner);
    println!();
    println!("Sync a folder into it with: {}", format!("lore sync \"{}\" <dir>", kb.name).cyan());
    Ok(())
}

pub fn list(principal: &str) -> Result<()> {
    let (engine, _) = open_engine()?;
    let bases = engine.list_kbs(principal)?;

    if bases.is_empty() {
        println!("{}", "No knowledge bases found.".dimmed());
        println!("Create one with: {}", "lore kb create <name>".cyan());
        return Ok(());
    }

    println!("{}", "Knowledge Bases".cyan().bold());
    println!("{}", "─".repeat(70));
    for kb in &bases {
        print_summary(kb, principal);
    }
    Ok(())
}

fn print_summary(kb: &KnowledgeBase, principal: &str) {
    let role = if kb.policy.is_owner(principal) {
        "owner".to_string()
    } else {
        kb.policy
            .mode_for(principal)
            .map(|m| m.to_string())
            .unwrap_or_else(|| "public".to_string())
    };
    let synced = kb
        .cursor
        .map(|c| c.synced_at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string());

    println!(
        "  {} {} [{}] {} {}",
        "•".dimmed(),
        kb.name.white().bold(),
        kb.state,
        format!("({})", role).dimmed(),
        format!("last sync: {}", synced).dimmed()
    );
}

pub fn show(principal: &str, name: &str) -> Result<()> {
    let (engine, _) = open_engine()?;
    let kb = engine.kb(principal, name)?;
    let stats = engine.stats(principal, name)?;

    println!("{}", kb.name.cyan().bold());
    println!("{}", "─".repeat(50));
    println!("  ID: {}", kb.id);
    println!("  State: {}", kb.state);
    println!("  Owner: {}", kb.policy.owner);
    println!("  Public: {}", if kb.policy.public { "yes" } else { "no" });
    println!("  Created: {}", kb.created_at.format("%Y-%m-%d %H:%M"));
    match kb.cursor {
        Some(cursor) => println!(
            "  Last sync: {} (version {})",
            cursor.synced_at.format("%Y-%m-%d %H:%M"),
            cursor.version
        ),
        None => println!("  Last sync: {}", "never".dimmed()),
    }

    if !kb.policy.grants.is_empty() {
        println!();
        println!("{}", "Grants".white().bold());
        for grant in &kb.policy.grants {
            println!("  {} {} ({})", "•".dimmed(), grant.principal, grant.mode);
        }
    }

    println!();
    println!("{}", "Contents".white().bold());
    println!("  Documents: {}", stats.documents.to_string().green());
    println!("    ok: {}, partial: {}, failed: {}", stats.ok, stats.partial, stats.failed);
    println!("  Chunks: {}", stats.chunks);
    println!("  Text: {}", format_size(stats.text_bytes));
    if stats.superseded > 0 {
        println!("  Superseded (retained): {}", stats.superseded);
    }

    let failed = engine.failed_documents(principal, name)?;
    if !failed.is_empty() {
        println!();
        println!("{}", "Failed Conversions".red().bold());
        for doc in failed.iter().take(10) {
            println!("  {} {}", "✗".red(), doc.origin_id);
            if let Some(failure) = &doc.failure {
                println!("    {}", format!("{}: {}", failure.kind, failure.reason).dimmed());
            }
        }
        if failed.len() > 10 {
            println!("  {}", format!("...and {} more", failed.len() - 10).dimmed());
        }
    }

    Ok(())
}

pub fn grant(principal: &str, name: &str, grantee: &str, mode: &str) -> Result<()> {
    let mode = AccessMode::from_str(mode)
        .with_context(|| format!("Unknown access mode '{}' (expected read or sync)", mode))?;
    let (engine, _) = open_engine()?;
    engine.grant(principal, name, grantee, mode)?;
    println!("{} {} can now {} '{}'", "✓".green(), grantee, mode, name);
    Ok(())
}

pub fn revoke(principal: &str, name: &str, grantee: &str) -> Result<()> {
    let (engine, _) = open_engine()?;
    if engine.revoke(principal, name, grantee)? {
        println!("{} Revoked access of {} to '{}'", "✓".green(), grantee, name);
    } else {
        println!("{} {} had no grant on '{}'", "Note:".yellow(), grantee, name);
    }
    Ok(())
}

pub fn public(principal: &str, name: &str, public: bool) -> Result<()> {
    let (engine, _) = open_engine()?;
    engine.set_public(principal, name, public)?;
    if public {
        println!("{} '{}' is now readable by everyone", "✓".green(), name);
    } else {
        println!("{} '{}' is now private", "✓".green(), name);
    }
    Ok(())
}

pub fn delete(principal: &str, name: &str) -> Result<()> {
    let (engine, _) = open_engine()?;
    let rt = Runtime::new().context("Failed to create async runtime")?;
    rt.block_on(engine.delete_kb(principal, name))?;
    println!("{} {}", "Deleted:".green().bold(), name);
    Ok(())
}
