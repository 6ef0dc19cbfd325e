#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is one free-text value (keys, models,
/// prompt). An empty remainder means "clear this field".
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "hf_key",
        action: "set_caption_key",
    },
    CommandSpec {
        command: "or_key",
        action: "set_insight_key",
    },
    CommandSpec {
        command: "caption_model",
        action: "set_caption_model",
    },
    CommandSpec {
        command: "insight_model",
        action: "set_insight_model",
    },
    CommandSpec {
        command: "prompt",
        action: "set_prompt",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "sample",
        action: "select_sample",
    },
    CommandSpec {
        command: "upload",
        action: "select_file",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "analyze",
        action: "analyze",
    },
    CommandSpec {
        command: "clear",
        action: "clear",
    },
    CommandSpec {
        command: "samples",
        action: "list_samples",
    },
    CommandSpec {
        command: "models",
        action: "list_models",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/hf_key",
    "/or_key",
    "/caption_model",
    "/insight_model",
    "/prompt",
    "/sample",
    "/upload",
    "/clear",
    "/analyze",
    "/samples",
    "/models",
    "/status",
    "/help",
    "/quit",
];
