pub mod actor;
mod actor_cell;
pub mod actor_ref;
pub mod actor_system;
pub mod context;
pub mod error;
pub mod messages;

pub mod api {
    use log::info;

    use super::actor::Actor;
    use super::actor_ref::ActorRef;
    use super::actor_system::ActorSystem;
    use super::error::ActorResult;
    use crate::config::SluiceConfig;

    pub fn start_actor_system() -> ActorSystem {
        ActorSystem::new()
    }

    pub fn start_actor_system_with_config(config: SluiceConfig) -> ActorSystem {
        ActorSystem::with_config(config)
    }

    pub fn spawn_actor<T: Actor + 'static>(
        actor_system: &mut ActorSystem,
        name: &str,
        actor: T,
    ) -> ActorRef {
        info!(actor = name; "Spawning actor");
        actor_system.spawn(name, actor)
    }

    pub fn kill_actor(actor_system: &ActorSystem, actor: &ActorRef) -> ActorResult<()> {
        actor_system.kill(actor)
    }

    pub async fn terminate_actor_system(actor_system: &mut ActorSystem) -> ActorResult<()> {
        actor_system.stop_system().await
    }

    // grcov-excl-stop
}
