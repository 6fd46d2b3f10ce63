//! The capability set a host application provides to the session.

use crate::types::FrameInput;
use crate::wire::Command;

/// Host-application hooks driven by the tick loop.
///
/// The session calls these from the thread that invoked
/// [`Session::run`](crate::Session::run), never concurrently.
pub trait Simulation: Send {
    /// The application's command payload type.
    type Command: Command;

    /// Collects the local command for the current frame.
    ///
    /// Must return a value every tick; when the user did nothing this
    /// frame, return whatever encodes "no input" in the application's
    /// semantics.
    fn read_input(&mut self) -> Self::Command;

    /// Provides the priming commands pushed before the loop starts.
    ///
    /// These establish the initial pipeline depth: with `k` priming
    /// commands, the command collected at frame `n` executes at frame
    /// `n - k`, giving the network `k` ticks of slack. May be empty.
    fn fill_commands(&mut self) -> Vec<Self::Command>;

    /// Applies one command to the simulation.
    ///
    /// Must be deterministic: identical inputs on every host must
    /// produce identical simulation states.
    fn execute_frame(&mut self, input: FrameInput<Self::Command>);

    /// Called when the next frame is missing input from at least one
    /// peer and the simulation is about to stall.
    fn suspend_simulation(&mut self) {}

    /// Called when the stall is over, paired with
    /// [`suspend_simulation`](Self::suspend_simulation). Neither hook
    /// fires when every input was already available.
    fn resume_simulation(&mut self) {}
}
