use std::io;
use std::path::Path;

/// Graph-rewrite capability the search drives.
///
/// The engine decides which options are legal in a state; the generator only
/// picks among them.
pub trait RewriteEngine: Send + Sync + 'static {
    type State: Clone + Send + Sync + 'static;
    type Opt: Clone + Send + Sync + 'static;

    fn seed(&self) -> Self::State;

    /// Growth rule applications legal in `state`. Empty means a dead end.
    fn options(&self, state: &Self::State) -> Vec<Self::Opt>;

    /// Options that terminate the structure.
    fn closing_options(&self, state: &Self::State) -> Vec<Self::Opt>;

    fn apply(&self, option: &Self::Opt, state: &Self::State) -> Self::State;
}

/// Turns a rewrite state into a named molecule and simulation input.
pub trait StructureConverter: RewriteEngine {
    /// Identifier used for file names and job keys. Equal structures must
    /// map to equal ids.
    fn linker_id(&self, state: &Self::State) -> String;

    fn canonical_string(&self, state: &Self::State) -> String;

    fn write_simulation_input(
        &self,
        state: &Self::State,
        coeff: &Path,
        lmpdat: &Path,
    ) -> io::Result<()>;

    /// Backbone bond angle in degrees; the best-metric closing strategy
    /// maximizes it.
    fn bond_angle(&self, state: &Self::State) -> f64;
}

/// A structure under construction.
#[derive(Debug, Clone)]
pub struct Candidate<S> {
    pub state: S,
    pub rules_applied: usize,
}

impl<S> Candidate<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            rules_applied: 0,
        }
    }
}
