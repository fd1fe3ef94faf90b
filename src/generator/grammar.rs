//! A small linear-chain grammar used by `demo` runs and tests.
//!
//! A chain starts at a phenylene anchor, grows one fragment per rule and is
//! closed by an end cap. Adjacency rules make some walks dead-end so that
//! the generator's restart paths are exercised with a real engine.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use super::engine::{RewriteEngine, StructureConverter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Ch2,
    Nh,
    O,
    Ph,
    ChCh,
    CC,
}

impl Unit {
    pub const ALL: [Unit; 6] = [Unit::Ch2, Unit::Nh, Unit::O, Unit::Ph, Unit::ChCh, Unit::CC];

    fn symbol(self) -> &'static str {
        match self {
            Unit::Ch2 => "CH2",
            Unit::Nh => "NH",
            Unit::O => "O",
            Unit::Ph => "Ph",
            Unit::ChCh => "CHCH",
            Unit::CC => "CC",
        }
    }

    fn smiles(self) -> &'static str {
        match self {
            Unit::Ch2 => "C",
            Unit::Nh => "N",
            Unit::O => "O",
            Unit::Ph => "c1ccc(cc1)",
            Unit::ChCh => "C=C",
            Unit::CC => "C#C",
        }
    }

    /// Deviation from a straight backbone, in degrees.
    fn bend(self) -> f64 {
        match self {
            Unit::Ch2 => 70.5,
            Unit::Nh => 73.0,
            Unit::O => 75.0,
            Unit::Ph | Unit::CC => 0.0,
            Unit::ChCh => 60.0,
        }
    }

    fn atoms(self) -> usize {
        match self {
            Unit::Ch2 | Unit::Nh | Unit::O => 1,
            Unit::Ph => 6,
            Unit::ChCh | Unit::CC => 2,
        }
    }

    fn heteroatom(self) -> bool {
        matches!(self, Unit::Nh | Unit::O)
    }

    /// Heteroatoms never bond to each other.
    fn may_follow(self, previous: Unit) -> bool {
        !(self.heteroatom() && previous.heteroatom())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cap {
    Coo,
    Nh2,
    Oh,
    Cn,
}

impl Cap {
    pub const ALL: [Cap; 4] = [Cap::Coo, Cap::Nh2, Cap::Oh, Cap::Cn];

    fn symbol(self) -> &'static str {
        match self {
            Cap::Coo => "COO",
            Cap::Nh2 => "NH2",
            Cap::Oh => "OH",
            Cap::Cn => "CN",
        }
    }

    fn smiles(self) -> &'static str {
        match self {
            Cap::Coo => "C(=O)O",
            Cap::Nh2 => "N",
            Cap::Oh => "O",
            Cap::Cn => "C#N",
        }
    }

    fn bend(self) -> f64 {
        match self {
            Cap::Coo => 60.0,
            Cap::Nh2 => 73.0,
            Cap::Oh => 75.0,
            Cap::Cn => 0.0,
        }
    }

    fn atoms(self) -> usize {
        match self {
            Cap::Coo => 3,
            Cap::Nh2 | Cap::Oh => 1,
            Cap::Cn => 2,
        }
    }

    fn may_follow(self, previous: Unit) -> bool {
        match self {
            Cap::Nh2 | Cap::Oh => !previous.heteroatom(),
            Cap::Coo => previous != Unit::CC,
            Cap::Cn => previous != Unit::O,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRule {
    Grow(Unit),
    Close(Cap),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chain {
    units: Vec<Unit>,
    cap: Option<Cap>,
}

impl Chain {
    fn last(&self) -> Unit {
        self.units.last().copied().unwrap_or(Unit::Ph)
    }

    fn atoms(&self) -> usize {
        self.units.iter().map(|u| u.atoms()).sum::<usize>() + self.cap.map_or(0, Cap::atoms)
    }
}

/// Rewrite engine over linear fragment chains.
#[derive(Debug, Clone, Default)]
pub struct ChainGrammar {
    max_units: Option<usize>,
}

impl ChainGrammar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop offering growth rules once a chain holds `max_units` fragments.
    pub fn with_max_units(max_units: usize) -> Self {
        Self {
            max_units: Some(max_units),
        }
    }
}

impl RewriteEngine for ChainGrammar {
    type State = Chain;
    type Opt = ChainRule;

    fn seed(&self) -> Chain {
        Chain {
            units: vec![Unit::Ph],
            cap: None,
        }
    }

    fn options(&self, state: &Chain) -> Vec<ChainRule> {
        if state.cap.is_some() || self.max_units.is_some_and(|max| state.units.len() >= max) {
            return Vec::new();
        }
        let last = state.last();
        Unit::ALL
            .into_iter()
            .filter(|unit| unit.may_follow(last))
            .map(ChainRule::Grow)
            .collect()
    }

    fn closing_options(&self, state: &Chain) -> Vec<ChainRule> {
        if state.cap.is_some() {
            return Vec::new();
        }
        let last = state.last();
        Cap::ALL
            .into_iter()
            .filter(|cap| cap.may_follow(last))
            .map(ChainRule::Close)
            .collect()
    }

    fn apply(&self, option: &ChainRule, state: &Chain) -> Chain {
        let mut next = state.clone();
        match *option {
            ChainRule::Grow(unit) => next.units.push(unit),
            ChainRule::Close(cap) => next.cap = Some(cap),
        }
        next
    }
}

impl StructureConverter for ChainGrammar {
    fn linker_id(&self, state: &Chain) -> String {
        let mut id: String = state.units.iter().map(|u| u.symbol()).collect();
        if let Some(cap) = state.cap {
            id.push('_');
            id.push_str(cap.symbol());
        }
        id
    }

    fn canonical_string(&self, state: &Chain) -> String {
        let mut smiles = String::from("*");
        for unit in &state.units {
            smiles.push_str(unit.smiles());
        }
        if let Some(cap) = state.cap {
            smiles.push_str(cap.smiles());
        }
        smiles
    }

    fn write_simulation_input(&self, state: &Chain, coeff: &Path, lmpdat: &Path) -> io::Result<()> {
        let id = self.linker_id(state);
        let atoms = state.atoms();
        let bonds = atoms.saturating_sub(1);

        let mut coeff_text = format!("# {id}\n\nBond Coeffs\n\n");
        for (i, unit) in state.units.iter().enumerate() {
            let _ = writeln!(coeff_text, "{} 350.0 {:.3}  # {}", i + 1, 1.4 + unit.bend() / 1000.0, unit.symbol());
        }
        fs::write(coeff, coeff_text)?;

        let mut data = format!("{id} {}\n\n{atoms} atoms\n{bonds} bonds\n\nAtoms\n\n", self.canonical_string(state));
        for i in 0..atoms {
            let _ = writeln!(data, "{} 1 1 0.0 {:.3} 0.0 0.0", i + 1, i as f64 * 1.4);
        }
        fs::write(lmpdat, data)
    }

    /// `180 - total bend / (fragments + 1)`.
    fn bond_angle(&self, state: &Chain) -> f64 {
        let bend: f64 = state.units.iter().map(|u| u.bend()).sum::<f64>()
            + state.cap.map_or(0.0, Cap::bend);
        180.0 - bend / (state.units.len() + 1) as f64
    }
}
