// CLI subcommands

pub mod clean_cache;
pub mod run;
