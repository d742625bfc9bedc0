use crate::lexer::MAX_STAGES;
use argh::FromArgs;

fn default_prompt() -> String {
    "> ".to_string()
}

fn default_max_stages() -> usize {
    MAX_STAGES
}

#[derive(FromArgs, Debug, Clone, PartialEq, Eq)]
/// Read lines from the terminal and run them as pipelines of programs
/// separated by `|`.
pub struct ShellConfig {
    #[argh(option, default = "default_prompt()")]
    /// prompt printed before each line.
    pub prompt: String,

    #[argh(option, default = "default_max_stages()")]
    /// maximum number of stages accepted in one line.
    pub max_stages: usize,

    #[argh(switch)]
    /// do not keep an in-memory line history.
    pub no_history: bool,

    #[argh(switch, short = 'v')]
    /// log spawns, channels and reaped statuses to stderr.
    pub verbose: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            max_stages: default_max_stages(),
            no_history: false,
            verbose: false,
        }
    }
}
