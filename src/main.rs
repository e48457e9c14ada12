use std::env;
use std::error::Error;

use log::{error, info};
use tokio::sync::oneshot;

use sluice::actors::actor::Actor;
use sluice::actors::actor_ref::ActorRef;
use sluice::actors::actor_system::ActorSystem;
use sluice::actors::context::ActorContext;
use sluice::config::SluiceConfig;
use sluice::streaming::{
    attach_stream_sink, attach_stream_source, batch_sink_fn, source_fn, Downstream, Handshake, OpenStreamMsg,
    Payload, StreamError, StreamResult,
};

struct Numbers {
    dest: ActorRef,
    limit: u64,
}

impl Actor for Numbers {
    async fn receive(&mut self, _ctx: &mut ActorContext, _from: Option<ActorRef>, _message: Payload) {}

    fn on_start(&mut self, ctx: &mut ActorContext) {
        let limit = self.limit;
        let driver = source_fn(
            |next: &mut u64| {
                *next = 1;
                Ok(())
            },
            move |next: &mut u64, out: &mut Downstream<'_, u64>, hint: usize| {
                for _ in 0..hint {
                    if *next > limit {
                        break;
                    }
                    out.push(*next);
                    *next += 1;
                }
                Ok(())
            },
            move |next: &u64| *next > limit,
        );
        if let Err(err) = driver.and_then(|d| attach_stream_source(ctx, &self.dest, Handshake::new(), d)) {
            error!(actor = ctx.name(); "Could not start the stream: {}", err);
        }
    }
}

struct Total {
    done: Option<oneshot::Sender<(u64, Option<StreamError>)>>,
}

impl Actor for Total {
    async fn receive(&mut self, _ctx: &mut ActorContext, _from: Option<ActorRef>, _message: Payload) {}

    fn on_stream_open(&mut self, ctx: &mut ActorContext, open: OpenStreamMsg) -> StreamResult<()> {
        let stream = open.stream::<u64>()?;
        let mut done = self.done.take();
        let driver = batch_sink_fn(|_: &mut u64| Ok(()), |sum: &mut u64, xs: Vec<u64>| {
            *sum += xs.iter().sum::<u64>()
        })?
        .on_finalize(move |sum: &mut u64, reason: Option<StreamError>| {
            if let Some(done) = done.take() {
                let _ = done.send((*sum, reason));
            }
        });
        attach_stream_sink(ctx, &stream, driver)?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = match env::var("SLUICE_CONFIG") {
        Ok(path) => SluiceConfig::load_from_file(path)?,
        Err(_) => SluiceConfig::default(),
    };
    let mut actor_system = ActorSystem::with_config(config);

    let (tx, rx) = oneshot::channel();
    let total = actor_system.spawn("total", Total { done: Some(tx) });
    actor_system.spawn("numbers", Numbers { dest: total, limit: 1000 });

    match rx.await {
        Ok((sum, None)) => info!(actor = "main"; "Stream finished with sum {}", sum),
        Ok((sum, Some(reason))) => error!(actor = "main"; "Stream failed after sum {}: {}", sum, reason),
        Err(_) => error!(actor = "main"; "Sink never reported"),
    }

    actor_system.stop_system().await?;
    Ok(())
}
