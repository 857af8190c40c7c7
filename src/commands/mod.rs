mod command_error;
mod command_registry;
mod config_get;
mod echo;
mod get;
mod info;
mod keys;
mod ping;
mod psync;
mod replconf;
mod set;
mod type_command;
mod wait;
mod xadd;

pub use command_error::CommandError;
pub use command_registry::CommandRegistry;

/// Every command the server knows, sub-commands included.
///
/// Sub-command resolution happens here, once, at the edge: `SET … PX …`
/// becomes `SetPx`, `REPLCONF GETACK` becomes `ReplconfGetack`, `CONFIG
/// GET` becomes `ConfigGet`. Handlers and subscribers downstream never
/// see a command name that is not one of these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Ping,
    Echo,
    Get,
    Set,
    SetPx,
    Keys,
    TypeOf,
    Xadd,
    Info,
    Replconf,
    ReplconfGetack,
    Psync,
    Wait,
    ConfigGet,
}

impl CommandKind {
    /// Resolves an upper-cased command name (plus its arguments, for
    /// sub-command routing) to a kind. `None` means unknown command.
    pub fn resolve(name: &str, args: &[String]) -> Option<Self> {
        match name {
            "PING" => Some(CommandKind::Ping),
            "ECHO" => Some(CommandKind::Echo),
            "GET" => Some(CommandKind::Get),
            "SET" => {
                if args.len() > 2 && args[2].eq_ignore_ascii_case("px") {
                    Some(CommandKind::SetPx)
                } else {
                    Some(CommandKind::Set)
                }
            }
            "KEYS" => Some(CommandKind::Keys),
            "TYPE" => Some(CommandKind::TypeOf),
            "XADD" => Some(CommandKind::Xadd),
            "INFO" => Some(CommandKind::Info),
            "REPLCONF" => match args.first() {
                Some(first) if first.eq_ignore_ascii_case("getack") => {
                    Some(CommandKind::ReplconfGetack)
                }
                _ => Some(CommandKind::Replconf),
            },
            "PSYNC" => Some(CommandKind::Psync),
            "WAIT" => Some(CommandKind::Wait),
            "CONFIG" => match args.first() {
                Some(first) if first.eq_ignore_ascii_case("get") => Some(CommandKind::ConfigGet),
                _ => None,
            },
            _ => None,
        }
    }

    /// The name carried in `CommandExecuted` notifications; synthesized
    /// sub-commands keep their `CMD_SUB` spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Ping => "PING",
            CommandKind::Echo => "ECHO",
            CommandKind::Get => "GET",
            CommandKind::Set => "SET",
            CommandKind::SetPx => "SET_PX",
            CommandKind::Keys => "KEYS",
            CommandKind::TypeOf => "TYPE",
            CommandKind::Xadd => "XADD",
            CommandKind::Info => "INFO",
            CommandKind::Replconf => "REPLCONF",
            CommandKind::ReplconfGetack => "REPLCONF_GETACK",
            CommandKind::Psync => "PSYNC",
            CommandKind::Wait => "WAIT",
            CommandKind::ConfigGet => "CONFIG_GET",
        }
    }
}
