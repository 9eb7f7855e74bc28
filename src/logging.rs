use colored::{ColoredString, Colorize};
use fern::Dispatch;
use log::{Level, LevelFilter};

/// Crates of this workspace, with the tag their records are printed with.
const LOCAL_TARGETS: [(&str, Target); 4] = [
    ("jamroom_core", Target::Core),
    ("jamroom_collab", Target::Collab),
    ("jamroom_impls", Target::Impls),
    ("jamroom", Target::Host),
];

/// Sets up colored logging to stdout.
///
/// Our own crates log from info up, or from debug up when verbose. Everything else only
/// gets through with warnings and errors.
pub fn init_logger(verbose: bool) {
    let local_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let dispatch = LOCAL_TARGETS
        .iter()
        .fold(Dispatch::new().level(LevelFilter::Warn), |dispatch, (name, _)| {
            dispatch.level_for(*name, local_level)
        });

    dispatch
        .format(|out, message, record| {
            let now = chrono::Local::now();

            out.finish(format_args!(
                "{} {} {:<6} {}",
                now.format("%H:%M:%S%.3f").to_string().bright_black(),
                level_badge(record.level()),
                tag_for(record.target()),
                message
            ))
        })
        .chain(std::io::stdout())
        .apply()
        .expect("logging is initialized")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Host,
    Collab,
    Impls,
    Core,
}

impl Target {
    /// Finds the workspace crate a log target belongs to.
    fn of(target: &str) -> Option<Self> {
        let module = target.split("::").next().unwrap_or_default();

        LOCAL_TARGETS
            .iter()
            .find(|(name, _)| *name == module)
            .map(|(_, target)| *target)
    }

    fn tag(self) -> ColoredString {
        match self {
            Target::Host => "HOST".bright_green(),
            Target::Collab => "COLLAB".bright_purple(),
            Target::Impls => "IMPLS".yellow(),
            Target::Core => "CORE".blue(),
        }
    }
}

fn tag_for(target: &str) -> ColoredString {
    match Target::of(target) {
        Some(local) => local.tag(),
        None => target.split("::").next().unwrap_or(target).dimmed(),
    }
}

fn level_badge(level: Level) -> ColoredString {
    match level {
        Level::Error => " ERR ".black().on_red().bold(),
        Level::Warn => " WRN ".black().on_yellow().bold(),
        Level::Info => " INF ".black().on_blue().bold(),
        Level::Debug => " DBG ".white().on_black(),
        Level::Trace => " TRC ".normal(),
    }
}
