use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = terminal_announcer::cli::Cli::parse();
    terminal_announcer::run(cli)
}
