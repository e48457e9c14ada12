//! User logic plugged into stream managers.
//!
//! A driver owns the user state of a stream segment. Implement the traits directly, or build a
//! driver from closures with [`source_fn`], [`sink_fn`], [`batch_sink_fn`] and [`stage_fn`].

use std::marker::PhantomData;

use super::downstream_manager::Downstream;
use super::error::{StreamError, StreamResult};

/// Produces the elements of a source.
pub trait SourceDriver: Send + 'static {
    type Output: Clone + Send + 'static;

    /// Pushes up to `hint` elements. Returning an error aborts the stream.
    fn pull(&mut self, out: &mut Downstream<'_, Self::Output>, hint: usize) -> StreamResult<()>;

    /// True once the source has nothing left to produce.
    fn done(&self) -> bool;

    /// Called exactly once when the manager terminates.
    fn finalize(&mut self, _reason: Option<StreamError>) {}
}

/// Consumes the elements of a sink.
pub trait SinkDriver: Send + 'static {
    type Input: Send + 'static;

    fn process(&mut self, xs: Vec<Self::Input>);

    /// Called exactly once when the manager terminates.
    fn finalize(&mut self, _reason: Option<StreamError>) {}

    /// Admission control: how much of the `desired` credit to grant.
    fn acquire_credit(&mut self, desired: usize) -> usize {
        desired
    }

    /// While true, no new credit is handed out.
    fn congested(&self) -> bool {
        false
    }
}

/// Transforms the elements passing through a stage.
pub trait StageDriver: Send + 'static {
    type Input: Send + 'static;
    type Output: Clone + Send + 'static;

    fn process(&mut self, out: &mut Downstream<'_, Self::Output>, xs: Vec<Self::Input>);

    /// Called exactly once when the manager terminates.
    fn finalize(&mut self, _reason: Option<StreamError>) {}
}

type NoFinalize<S> = fn(&mut S, Option<StreamError>);

fn no_finalize<S>(_state: &mut S, _reason: Option<StreamError>) {}

fn init_state<S: Default>(init: impl FnOnce(&mut S) -> StreamResult<()>) -> StreamResult<S> {
    let mut state = S::default();
    init(&mut state)?;
    Ok(state)
}

pub struct SourceFn<S, T, P, D, F> {
    state: S,
    pull: P,
    done: D,
    finalize: F,
    _output: PhantomData<fn() -> T>,
}

/// Builds a source driver from closures. `init` runs once, right here.
pub fn source_fn<S, T, I, P, D>(
    init: I,
    pull: P,
    done: D,
) -> StreamResult<SourceFn<S, T, P, D, NoFinalize<S>>>
where
    S: Default + Send + 'static,
    T: Clone + Send + 'static,
    I: FnOnce(&mut S) -> StreamResult<()>,
    P: FnMut(&mut S, &mut Downstream<'_, T>, usize) -> StreamResult<()> + Send + 'static,
    D: Fn(&S) -> bool + Send + 'static,
{
    Ok(SourceFn {
        state: init_state(init)?,
        pull,
        done,
        finalize: no_finalize::<S>,
        _output: PhantomData,
    })
}

impl<S, T, P, D, F> SourceFn<S, T, P, D, F> {
    pub fn on_finalize<G>(self, finalize: G) -> SourceFn<S, T, P, D, G>
    where
        G: FnMut(&mut S, Option<StreamError>) + Send + 'static,
    {
        SourceFn {
            state: self.state,
            pull: self.pull,
            done: self.done,
            finalize,
            _output: PhantomData,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }
}

impl<S, T, P, D, F> SourceDriver for SourceFn<S, T, P, D, F>
where
    S: Send + 'static,
    T: Clone + Send + 'static,
    P: FnMut(&mut S, &mut Downstream<'_, T>, usize) -> StreamResult<()> + Send + 'static,
    D: Fn(&S) -> bool + Send + 'static,
    F: FnMut(&mut S, Option<StreamError>) + Send + 'static,
{
    type Output = T;

    fn pull(&mut self, out: &mut Downstream<'_, T>, hint: usize) -> StreamResult<()> {
        (self.pull)(&mut self.state, out, hint)
    }

    fn done(&self) -> bool {
        (self.done)(&self.state)
    }

    fn finalize(&mut self, reason: Option<StreamError>) {
        (self.finalize)(&mut self.state, reason)
    }
}

/// Sink driver built from closures. `BATCH` selects vector-wise processing.
pub struct SinkFn<S, T, P, F, const BATCH: bool> {
    state: S,
    process: P,
    finalize: F,
    _input: PhantomData<fn(T)>,
}

/// Builds a sink driver that processes one element at a time.
pub fn sink_fn<S, T, I, P>(init: I, process: P) -> StreamResult<SinkFn<S, T, P, NoFinalize<S>, false>>
where
    S: Default + Send + 'static,
    T: Send + 'static,
    I: FnOnce(&mut S) -> StreamResult<()>,
    P: FnMut(&mut S, T) + Send + 'static,
{
    Ok(SinkFn {
        state: init_state(init)?,
        process,
        finalize: no_finalize::<S>,
        _input: PhantomData,
    })
}

/// Builds a sink driver that processes whole batches.
pub fn batch_sink_fn<S, T, I, P>(
    init: I,
    process: P,
) -> StreamResult<SinkFn<S, T, P, NoFinalize<S>, true>>
where
    S: Default + Send + 'static,
    T: Send + 'static,
    I: FnOnce(&mut S) -> StreamResult<()>,
    P: FnMut(&mut S, Vec<T>) + Send + 'static,
{
    Ok(SinkFn {
        state: init_state(init)?,
        process,
        finalize: no_finalize::<S>,
        _input: PhantomData,
    })
}

impl<S, T, P, F, const BATCH: bool> SinkFn<S, T, P, F, BATCH> {
    pub fn on_finalize<G>(self, finalize: G) -> SinkFn<S, T, P, G, BATCH>
    where
        G: FnMut(&mut S, Option<StreamError>) + Send + 'static,
    {
        SinkFn {
            state: self.state,
            process: self.process,
            finalize,
            _input: PhantomData,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }
}

impl<S, T, P, F> SinkDriver for SinkFn<S, T, P, F, false>
where
    S: Send + 'static,
    T: Send + 'static,
    P: FnMut(&mut S, T) + Send + 'static,
    F: FnMut(&mut S, Option<StreamError>) + Send + 'static,
{
    type Input = T;

    fn process(&mut self, xs: Vec<T>) {
        for x in xs {
            (self.process)(&mut self.state, x);
        }
    }

    fn finalize(&mut self, reason: Option<StreamError>) {
        (self.finalize)(&mut self.state, reason)
    }
}

impl<S, T, P, F> SinkDriver for SinkFn<S, T, P, F, true>
where
    S: Send + 'static,
    T: Send + 'static,
    P: FnMut(&mut S, Vec<T>) + Send + 'static,
    F: FnMut(&mut S, Option<StreamError>) + Send + 'static,
{
    type Input = T;

    fn process(&mut self, xs: Vec<T>) {
        (self.process)(&mut self.state, xs)
    }

    fn finalize(&mut self, reason: Option<StreamError>) {
        (self.finalize)(&mut self.state, reason)
    }
}

pub struct StageFn<S, In, Out, P, F> {
    state: S,
    process: P,
    finalize: F,
    _types: PhantomData<fn(In) -> Out>,
}

/// Builds a stage driver that transforms one element at a time.
pub fn stage_fn<S, In, Out, I, P>(
    init: I,
    process: P,
) -> StreamResult<StageFn<S, In, Out, P, NoFinalize<S>>>
where
    S: Default + Send + 'static,
    In: Send + 'static,
    Out: Clone + Send + 'static,
    I: FnOnce(&mut S) -> StreamResult<()>,
    P: FnMut(&mut S, &mut Downstream<'_, Out>, In) + Send + 'static,
{
    Ok(StageFn {
        state: init_state(init)?,
        process,
        finalize: no_finalize::<S>,
        _types: PhantomData,
    })
}

impl<S, In, Out, P, F> StageFn<S, In, Out, P, F> {
    pub fn on_finalize<G>(self, finalize: G) -> StageFn<S, In, Out, P, G>
    where
        G: FnMut(&mut S, Option<StreamError>) + Send + 'static,
    {
        StageFn {
            state: self.state,
            process: self.process,
            finalize,
            _types: PhantomData,
        }
    }
}

impl<S, In, Out, P, F> StageDriver for StageFn<S, In, Out, P, F>
where
    S: Send + 'static,
    In: Send + 'static,
    Out: Clone + Send + 'static,
    P: FnMut(&mut S, &mut Downstream<'_, Out>, In) + Send + 'static,
    F: FnMut(&mut S, Option<StreamError>) + Send + 'static,
{
    type Input = In;
    type Output = Out;

    fn process(&mut self, out: &mut Downstream<'_, Out>, xs: Vec<In>) {
        for x in xs {
            (self.process)(&mut self.state, out, x);
        }
    }

    fn finalize(&mut self, reason: Option<StreamError>) {
        (self.finalize)(&mut self.state, reason)
    }
}
