//! Command-line interface

use clap::{Parser, Subcommand};

use bastion_core::{DomainId, DomainRelation, ObjectRef, SubjectRef, UserId};
use bastion_token::TokenKind;

#[derive(Debug, Parser)]
#[command(name = "bastion")]
#[command(about = "Bastion - authorization core for IoT platforms", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Print plain text instead of JSON
    #[arg(long, global = true)]
    pub raw: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve,

    /// Apply database migrations
    Migrate,

    /// Generate an Ed25519 signing key pair (PKCS#8 PEM)
    Keygen,

    /// Issue or inspect tokens
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },

    /// Check a permission
    Check {
        /// Subject as `type:id` or `type:id#relation`
        #[arg(long)]
        subject: SubjectRef,

        /// Permission or relation name
        #[arg(long)]
        permission: String,

        /// Object as `type:id`
        #[arg(long)]
        object: ObjectRef,
    },

    /// Print the compiled authorization schema
    Schema,

    /// Remove expired nonces, old tombstones and domains frozen past retention
    Purge,
}

#[derive(Debug, Subcommand)]
pub enum TokenCommand {
    /// Issue a single token
    Issue {
        #[arg(long)]
        subject: UserId,

        /// access, refresh, invitation or recovery
        #[arg(long)]
        kind: TokenKind,

        #[arg(long)]
        domain: Option<DomainId>,

        /// Invitation relation (administrator, editor, viewer, member)
        #[arg(long)]
        relation: Option<DomainRelation>,
    },

    /// Verify a token and print what it says
    Identify { token: String },
}
