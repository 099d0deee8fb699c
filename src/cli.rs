use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "noteforge", about = "AI-enriched note capture with local hybrid search")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture a new note; metadata is derived before the command returns
    Add {
        /// The note text
        content: String,

        /// Include the stored reference document as classification context
        #[arg(long)]
        rag: bool,
    },

    /// Search notes (hybrid keyword + semantic); no query lists everything
    Search {
        query: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// Read queries line by line from stdin, re-searching as you type
        #[arg(long)]
        interactive: bool,
    },

    /// Replace a note's content and re-derive its metadata
    Edit { id: String, content: String },

    /// Delete a note
    Delete {
        id: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// AI-rewrite a note into a concise encyclopedic style
    Reformat { id: String },

    /// Undo the last reformat
    Revert { id: String },

    /// Re-run enrichment for one note
    Refresh { id: String },

    /// Re-run enrichment for every note, then rebuild the search index
    RefreshAll {},

    /// Import notes from a JSON file (existing ids are skipped)
    Import { file: PathBuf },

    /// Export all notes as JSON (stdout unless --file is given)
    Export {
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Switch the classifier model tier (flash | pro)
    Tier { tier: String },

    /// Show collection and AI pipeline status
    Status {},
}
