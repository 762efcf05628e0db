use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "Ask questions about your PDFs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Index documents (files or directories of .pdf/.txt/.md)")]
    Ingest {
        #[arg(required = true, help = "Files or directories to ingest")]
        paths: Vec<PathBuf>,
    },

    #[command(about = "Answer a question from the indexed documents")]
    Ask {
        #[arg(help = "The question")]
        query: String,

        #[arg(short, long, help = "Number of chunks to retrieve (default from config)")]
        k: Option<usize>,
    },

    #[command(about = "Run a canned task (summary, key points, ...) over one document")]
    Process {
        #[arg(help = "Document name as listed by `docs`")]
        filename: String,

        #[arg(help = "Option key, see `options`")]
        option: String,

        #[arg(short, long, help = "Number of chunks to use (default from config)")]
        k: Option<usize>,
    },

    #[command(about = "List indexed documents")]
    Docs,

    #[command(about = "Delete a document and its chunks")]
    Delete {
        #[arg(help = "Document name")]
        id: String,
    },

    #[command(about = "Drop the whole index")]
    Reset,

    #[command(about = "List processing options")]
    Options,
}
