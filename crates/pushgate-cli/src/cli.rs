use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "pushgate", version, about = "Drive the sync gateway's store adapters by hand")]
pub(crate) struct Cli {
    /// Config file; defaults to $XDG_CONFIG_HOME/pushgate/pushgate.toml.
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,
    /// Device whose folder ids are used.
    #[arg(long, global = true, default_value = "cli")]
    pub(crate) device: String,
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// List the folder hierarchy as the device sees it.
    Folders,
    Items(ItemsCmd),
    Get(GetCmd),
    Attachment(AttachmentCmd),
    Flag(FlagCmd),
    /// Wait for changes in the given folders.
    Watch(WatchCmd),
    Search(SearchCmd),
    Send(SendCmd),
    /// Directory search over the configured address book.
    Gal(GalCmd),
}

#[derive(Args, Debug)]
pub(crate) struct ItemsCmd {
    #[arg(long)]
    pub(crate) folder: String,
    /// Unix timestamp; older items are left out.
    #[arg(long, default_value_t = 0)]
    pub(crate) cutoff: i64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub(crate) enum BodyKind {
    Plain,
    Html,
    Mime,
    Rtf,
}

#[derive(Args, Debug)]
pub(crate) struct GetCmd {
    #[arg(long)]
    pub(crate) folder: String,
    #[arg(long)]
    pub(crate) id: String,
    #[arg(long, value_enum, default_value_t = BodyKind::Plain)]
    pub(crate) body: BodyKind,
    #[arg(long)]
    pub(crate) truncate: Option<usize>,
    #[arg(long)]
    pub(crate) preview: Option<usize>,
}

#[derive(Args, Debug)]
pub(crate) struct AttachmentCmd {
    /// `folder:item:part` as handed out with the item.
    #[arg(long)]
    pub(crate) reference: String,
    #[arg(long)]
    pub(crate) out: PathBuf,
}

#[derive(Args, Debug)]
pub(crate) struct FlagCmd {
    #[arg(long)]
    pub(crate) folder: String,
    #[arg(long)]
    pub(crate) id: String,
    #[arg(long)]
    pub(crate) read: Option<bool>,
    #[arg(long)]
    pub(crate) star: Option<bool>,
}

#[derive(Args, Debug)]
pub(crate) struct WatchCmd {
    #[arg(long = "folder", required = true)]
    pub(crate) folders: Vec<String>,
    #[arg(long, default_value_t = 60)]
    pub(crate) timeout: u64,
}

#[derive(Args, Debug)]
pub(crate) struct SearchCmd {
    #[arg(long, default_value = "")]
    pub(crate) text: String,
    #[arg(long)]
    pub(crate) folder: Option<String>,
    #[arg(long)]
    pub(crate) deep: bool,
    #[arg(long)]
    pub(crate) range: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    pub(crate) since: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    pub(crate) before: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct SendCmd {
    /// Message file in RFC 822 format.
    #[arg(long)]
    pub(crate) file: PathBuf,
    /// `folder:item` of the message being answered.
    #[arg(long, conflicts_with = "forward")]
    pub(crate) reply: Option<String>,
    /// `folder:item` of the message being forwarded.
    #[arg(long)]
    pub(crate) forward: Option<String>,
    #[arg(long)]
    pub(crate) no_save: bool,
}

#[derive(Args, Debug)]
pub(crate) struct GalCmd {
    #[arg(long)]
    pub(crate) query: String,
    #[arg(long)]
    pub(crate) range: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, CliCommand};

    #[test]
    fn global_flags_follow_subcommands() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "pushgate", "items", "--folder", "1a2b3c4d", "--cutoff", "1700000000", "--device", "phone",
            "-vv",
        ])?;
        assert_eq!(cli.device, "phone");
        assert_eq!(cli.verbose, 2);
        let CliCommand::Items(items) = cli.command else {
            anyhow::bail!("expected items");
        };
        assert_eq!(items.cutoff, 1_700_000_000);
        Ok(())
    }

    #[test]
    fn reply_and_forward_are_exclusive() {
        let parsed = Cli::try_parse_from([
            "pushgate", "send", "--file", "m.eml", "--reply", "a:1", "--forward", "a:2",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn watch_takes_repeated_folders() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["pushgate", "watch", "--folder", "a", "--folder", "b"])?;
        let CliCommand::Watch(watch) = cli.command else {
            anyhow::bail!("expected watch");
        };
        assert_eq!(watch.folders, vec!["a", "b"]);
        assert_eq!(watch.timeout, 60);
        Ok(())
    }
}
