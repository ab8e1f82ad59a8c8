use clap::Parser;

pub const HELP: &str = "\
vtmux - a bare-metal terminal multiplexer for the Linux console

Run with no arguments on a virtual console to start the engine. Run with
one command token to steer the running instance:

  --new-tab, -nt    open a new tab (up to 8) and switch to it
  --next,    -n     switch to the next tab
  --prev,    -p     switch to the previous tab
  --split-v, -s     split the active tab into two side-by-side panes
  --left,    -l     focus the left pane of a split tab
  --right,   -r     focus the right pane of a split tab
  --help,    -h     show this help

The engine logs to /tmp/vtmux.log and listens on /tmp/vtmux_<uid>.sock.
";

#[derive(Parser, Debug)]
#[command(
    name = "vtmux",
    version = env!("CARGO_PKG_VERSION"),
    about = "A bare-metal terminal multiplexer for the Linux console",
    disable_help_flag = true
)]
pub struct Cli {
    /// Control command for a running instance (long or short form).
    #[arg(value_name = "COMMAND", allow_hyphen_values = true)]
    pub command: Option<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

pub fn is_help(token: &str) -> bool {
    matches!(token, "--help" | "-h")
}
