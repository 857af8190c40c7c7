use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::commands::{
    command_error::CommandError, config_get, echo, get, info, keys, ping, psync, replconf, set,
    type_command, wait, xadd, CommandKind,
};
use crate::key_value_store::Keyspace;
use crate::notification::NotificationBus;
use crate::replication::ReplicationController;
use crate::resp::RespValue;
use crate::server::ServerInfo;
use crate::streams::StreamStore;

/// Maps resolved commands to their handlers, holding references to every
/// collaborator a handler may need. There are no hidden globals: all
/// state flows in here at construction.
pub struct CommandRegistry {
    keyspace: Arc<Keyspace>,
    streams: Arc<StreamStore>,
    server: Arc<ServerInfo>,
    replication: Arc<ReplicationController>,
    connected_replicas: AtomicUsize,
}

impl CommandRegistry {
    /// Builds the registry and subscribes it to the replica heartbeat so
    /// INFO can report `connected_slaves`.
    pub async fn new(
        keyspace: Arc<Keyspace>,
        streams: Arc<StreamStore>,
        server: Arc<ServerInfo>,
        replication: Arc<ReplicationController>,
        bus: &NotificationBus,
    ) -> Arc<Self> {
        let registry = Arc::new(Self {
            keyspace,
            streams,
            server,
            replication,
            connected_replicas: AtomicUsize::new(0),
        });

        {
            let registry = Arc::clone(&registry);
            bus.on_replica_heartbeat(move |heartbeat| {
                registry
                    .connected_replicas
                    .store(heartbeat.connected, Ordering::Relaxed);
            })
            .await;
        }

        registry
    }

    /// Runs one command. The response list is what goes back on the
    /// wire; an error becomes a single RESP error frame upstream.
    pub async fn execute(
        &self,
        kind: CommandKind,
        args: &[String],
    ) -> Result<Vec<RespValue>, CommandError> {
        match kind {
            CommandKind::Ping => ping::ping(args),
            CommandKind::Echo => echo::echo(args),
            CommandKind::Get => get::get(&self.keyspace, args).await,
            CommandKind::Set => set::set(&self.keyspace, args).await,
            CommandKind::SetPx => set::set_px(&self.keyspace, args).await,
            CommandKind::Keys => keys::keys(&self.keyspace, &self.streams, args).await,
            CommandKind::TypeOf => type_command::type_of(&self.keyspace, &self.streams, args).await,
            CommandKind::Xadd => xadd::xadd(&self.streams, args).await,
            CommandKind::Info => info::info(
                &self.server,
                self.connected_replicas.load(Ordering::Relaxed),
                args,
            ),
            CommandKind::Replconf => replconf::replconf(args),
            CommandKind::ReplconfGetack => {
                replconf::replconf_getack(&self.replication, args).await
            }
            CommandKind::Psync => psync::psync(&self.server, args),
            CommandKind::Wait => wait::wait(&self.replication, args).await,
            CommandKind::ConfigGet => config_get::config_get(&self.server, args),
        }
    }
}
