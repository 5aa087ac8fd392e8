//! Deferred-dependency records: pieces of an encoded word that can't be
//! filled in until every label in the program has a known address. The
//! driver resolves these in a second pass once the label table is final.

/// What a literal-pool slot will eventually hold.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum PoolValue {
    Label(String),
    Immediate(u32),
}

/// What kind of reference this is and what it refers to, independent of
/// where it lives. The encoder produces these without knowing final
/// addresses; the driver pairs one with a patch address and source line to
/// make a [`Dependency`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DependencyKind {
    /// A direct PC-relative `LDR`/`STR Rd, label`: bit 23 and the low 12
    /// bits are patched against `label`'s own address (spec's "addr" kind).
    Addr { label: String },
    /// An `LDR Rd, =value` literal-pool reference: patched with the same
    /// formula as `Addr`, but against the address of the pool slot holding
    /// `value` once that slot has been placed (spec's "addrptr" kind).
    AddrPtr { value: PoolValue },
    /// A `B`/`BL label` whose 24-bit word-granular signed offset is filled
    /// in once `label`'s address is known (spec's "addrbranch" kind).
    AddrBranch { label: String },
    /// A `DCD label` data word that holds `label`'s absolute address
    /// verbatim, with no PC-relative arithmetic.
    DataAddr { label: String },
}

/// One unresolved reference, located at the word it patches and the source
/// line it came from. The driver collects these while assembling and walks
/// them once more after every label has an address.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Dependency {
    pub address: u32,
    pub line: usize,
    pub kind: DependencyKind,
}
