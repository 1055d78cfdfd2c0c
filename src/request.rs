use std::fmt;

/// One category of derived file metadata that the engine knows how to fetch.
///
/// Each kind is owned by exactly one fetch state machine, and each
/// `(directory, kind)` pair has at most one operation in flight at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttributeKind {
	/// Membership of the directory itself: the initial enumeration of children.
	FileList,
	/// Basic stat-level information for a single file.
	FileInfo,
	/// Number of immediate children of a directory.
	ShallowCount,
	/// Recursive counts and cumulative size over a whole subtree.
	DeepCount,
	/// Information about the filesystem a file resides on.
	FilesystemInfo,
	/// The mount a file belongs to, if any.
	Mount,
	/// A decoded thumbnail image.
	Thumbnail,
	/// Metadata contributed by external info providers.
	ExtensionInfo,
}

pub(crate) const KIND_COUNT: usize = 8;

pub(crate) const ALL_KINDS: [AttributeKind; KIND_COUNT] = [
	AttributeKind::FileList,
	AttributeKind::FileInfo,
	AttributeKind::ShallowCount,
	AttributeKind::DeepCount,
	AttributeKind::FilesystemInfo,
	AttributeKind::Mount,
	AttributeKind::Thumbnail,
	AttributeKind::ExtensionInfo,
];

impl AttributeKind {
	#[inline]
	pub(crate) const fn bit(self) -> u8 {
		1 << self as u8
	}

	#[inline]
	pub(crate) const fn index(self) -> usize {
		self as usize
	}
}

/// An immutable bitmask describing which attribute kinds are wanted.
///
/// A thumbnail can only be resolved once the basic file info (and with it the
/// thumbnail path) is known, and mount resolution needs the file type, so
/// requesting [`AttributeKind::Thumbnail`] or [`AttributeKind::Mount`]
/// implicitly pulls in [`AttributeKind::FileInfo`] as well.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Request(u8);

impl Request {
	pub const EMPTY: Self = Self(0);

	/// Build a request from a set of attribute kinds, applying implications.
	#[must_use]
	pub fn of(kinds: impl IntoIterator<Item = AttributeKind>) -> Self {
		kinds.into_iter().fold(Self::EMPTY, Self::with)
	}

	/// Return this request with one more kind set, applying implications.
	#[must_use]
	pub fn with(self, kind: AttributeKind) -> Self {
		let mut bits = self.0 | kind.bit();
		if matches!(kind, AttributeKind::Thumbnail | AttributeKind::Mount) {
			bits |= AttributeKind::FileInfo.bit();
		}
		Self(bits)
	}

	#[inline]
	#[must_use]
	pub const fn wants(self, kind: AttributeKind) -> bool {
		self.0 & kind.bit() != 0
	}

	#[inline]
	#[must_use]
	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}

	pub(crate) fn kinds(self) -> impl Iterator<Item = AttributeKind> {
		ALL_KINDS.into_iter().filter(move |kind| self.wants(*kind))
	}
}

impl fmt::Debug for Request {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.kinds()).finish()
	}
}

impl FromIterator<AttributeKind> for Request {
	fn from_iter<I: IntoIterator<Item = AttributeKind>>(iter: I) -> Self {
		Self::of(iter)
	}
}

/// Per-kind tallies of how many monitors or ready callbacks currently want
/// each attribute kind, so the needy check can bail before any hash lookups.
#[derive(Debug, Default)]
pub(crate) struct RequestCounter([usize; KIND_COUNT]);

impl RequestCounter {
	pub(crate) fn add(&mut self, request: Request) {
		for kind in request.kinds() {
			self.0[kind.index()] += 1;
		}
	}

	pub(crate) fn remove(&mut self, request: Request) {
		for kind in request.kinds() {
			debug_assert!(self.0[kind.index()] > 0, "request counter underflow");
			self.0[kind.index()] = self.0[kind.index()].saturating_sub(1);
		}
	}

	#[inline]
	pub(crate) const fn count(&self, kind: AttributeKind) -> usize {
		self.0[kind.index()]
	}
}
