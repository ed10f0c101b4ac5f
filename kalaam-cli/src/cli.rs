use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "kalaam",
    version,
    about = "Read and listen to Urdu Naat and Hamd"
)]
pub struct Cli {
    /// Config file (defaults to ~/.config/kalaam/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Library database, overriding `storage.database_path`
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Email of the account to act as
    #[arg(long, short, global = true, env = "KALAAM_USER")]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an account and seed its library
    Register(RegisterArgs),
    /// Check that the account in --user can sign in
    Login,
    /// List categories
    Categories,
    /// List sub-categories
    Subcategories {
        #[arg(long)]
        category: Option<String>,
    },
    /// List lyrics
    Lyrics {
        #[arg(long)]
        sub_category: Option<String>,
    },
    /// Print a lyric as couplets
    Show { id: String },
    /// Search titles and verses
    Search {
        #[arg(default_value = "")]
        query: String,
        /// Only search favorites; an empty query lists them all
        #[arg(long)]
        favorites: bool,
    },
    /// Add or remove a favorite
    Favorite { id: String },
    AddCategory { name: String },
    AddSubCategory {
        #[arg(long)]
        category: String,
        name: String,
    },
    AddLyric(AddLyricArgs),
    /// Show or change display settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Ask the provider to explain a lyric
    Explain { id: String },
    /// Recite a lyric
    Play {
        id: String,
        /// Write the recitation to a WAV file instead of playing it
        #[arg(long, value_name = "PATH")]
        save: Option<PathBuf>,
    },
    /// Admin tools
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[arg(long)]
    pub username: String,
    #[arg(long)]
    pub email: String,
    #[arg(long, default_value = "")]
    pub name: String,
    #[arg(long, default_value = "")]
    pub phone: String,
}

#[derive(Args, Debug)]
pub struct AddLyricArgs {
    #[arg(long)]
    pub sub_category: String,
    #[arg(long)]
    pub title: String,
    /// Verse text; one line per misra
    #[arg(long, conflicts_with = "content_file", required_unless_present = "content_file")]
    pub content: Option<String>,
    /// Read the verse text from a file
    #[arg(long, value_name = "PATH")]
    pub content_file: Option<PathBuf>,
    #[arg(long)]
    pub audio_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    Show,
    Set {
        #[arg(long)]
        background_color: Option<String>,
        #[arg(long)]
        text_color: Option<String>,
        #[arg(long)]
        font_size: Option<u32>,
        #[arg(long)]
        line_height: Option<f32>,
    },
    /// Change your name, email or phone
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AdminAction {
    /// List all accounts
    Users,
    Enable { user_id: String },
    Disable { user_id: String },
    ToggleSignup,
    ToggleLogin,
    /// Set the logo URL, or clear it when omitted
    Logo { url: Option<String> },
}
