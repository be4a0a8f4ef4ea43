//! Graph edges discovered by the crawl and their reverse indexes.

use rustc_hash::FxHashMap;

use crate::index::{FieldIndex, ObjectIndex, TypeIndex};
use crate::source::{SourceKind, SourceLocation};

/// How an edge was discovered.
///
/// For a reference stored directly in a field, `field_index` is that field and
/// the value-type members are `None`. For a reference nested inside an
/// embedded value type, `field_index` is the outermost value-type field of the
/// scanned object, `value_type_owner` is the value type declaring the
/// reference, `value_type_field_index` is the reference field on that owner
/// and `offset_within_value_type` is the byte offset from the start of the
/// scanned data to the owner's data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Provenance {
    pub field_index: Option<FieldIndex>,
    pub value_type_owner: Option<TypeIndex>,
    pub value_type_field_index: Option<FieldIndex>,
    pub offset_within_value_type: u32,
    pub array_index: Option<u32>,
}

impl Provenance {
    /// Provenance of a root or native link edge.
    pub const NONE: Provenance = Provenance {
        field_index: None,
        value_type_owner: None,
        value_type_field_index: None,
        offset_within_value_type: 0,
        array_index: None,
    };

    pub fn field(field_index: FieldIndex) -> Self {
        Self {
            field_index: Some(field_index),
            ..Self::NONE
        }
    }

    pub fn array_element(array_index: u32) -> Self {
        Self {
            array_index: Some(array_index),
            ..Self::NONE
        }
    }

    pub fn with_array_index(self, array_index: u32) -> Self {
        Self {
            array_index: Some(array_index),
            ..self
        }
    }

    pub fn is_nested(&self) -> bool {
        self.value_type_owner.is_some()
    }
}

/// One edge of the object graph.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub from: SourceLocation,
    pub to: ObjectIndex,
    pub provenance: Provenance,
}

impl Connection {
    pub fn new(from: SourceLocation, to: ObjectIndex, provenance: Provenance) -> Self {
        Self {
            from,
            to,
            provenance,
        }
    }
}

/// Append-only list of edges.
#[derive(Debug, Clone, Default)]
pub struct ConnectionLog {
    connections: Vec<Connection>,
}

impl ConnectionLog {
    pub fn push(&mut self, connection: Connection) -> usize {
        self.connections.push(connection);
        self.connections.len() - 1
    }

    pub fn extend(&mut self, connections: impl IntoIterator<Item = Connection>) {
        self.connections.extend(connections);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Connection> {
        self.connections.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Connection> {
        self.connections.iter()
    }

    pub fn as_slice(&self) -> &[Connection] {
        &self.connections
    }

    /// Edges whose source is of `kind`.
    pub fn from_kind(&self, kind: SourceKind) -> impl Iterator<Item = &Connection> + '_ {
        self.connections
            .iter()
            .filter(move |connection| connection.from.kind() == kind)
    }
}

impl<'a> IntoIterator for &'a ConnectionLog {
    type Item = &'a Connection;
    type IntoIter = std::slice::Iter<'a, Connection>;

    fn into_iter(self) -> Self::IntoIter {
        self.connections.iter()
    }
}

/// Reverse indexes over a [`ConnectionLog`]: positions of the edges leaving
/// each source and arriving at each target, in log order.
///
/// # Examples
///
/// ```
/// use heapcrawl::connections::{Connection, ConnectionIndexMaps, ConnectionLog, Provenance};
/// use heapcrawl::index::ObjectIndex;
/// use heapcrawl::source::SourceLocation;
///
/// let mut log = ConnectionLog::default();
/// let a = SourceLocation::ManagedObject(ObjectIndex(0));
/// log.push(Connection::new(a, ObjectIndex(1), Provenance::NONE));
/// log.push(Connection::new(a, ObjectIndex(2), Provenance::NONE));
///
/// let maps = ConnectionIndexMaps::build(&log);
/// assert_eq!(maps.from_source(a), &[0, 1]);
/// assert_eq!(maps.to_target(ObjectIndex(2)), &[1]);
/// assert!(maps.to_target(ObjectIndex(0)).is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionIndexMaps {
    by_source: FxHashMap<SourceLocation, Vec<usize>>,
    by_target: FxHashMap<ObjectIndex, Vec<usize>>,
}

impl ConnectionIndexMaps {
    pub fn build(log: &ConnectionLog) -> Self {
        let mut maps = Self::default();
        for (position, connection) in log.iter().enumerate() {
            maps.by_source
                .entry(connection.from)
                .or_default()
                .push(position);
            maps.by_target
                .entry(connection.to)
                .or_default()
                .push(position);
        }
        maps
    }

    pub fn from_source(&self, source: SourceLocation) -> &[usize] {
        self.by_source.get(&source).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn to_target(&self, target: ObjectIndex) -> &[usize] {
        self.by_target.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn source_count(&self) -> usize {
        self.by_source.len()
    }

    pub fn target_count(&self) -> usize {
        self.by_target.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::GcHandleIndex;

    #[test]
    fn from_kind_filters_sources() {
        let mut log = ConnectionLog::default();
        log.push(Connection::new(
            SourceLocation::GcHandle(GcHandleIndex(0)),
            ObjectIndex(0),
            Provenance::NONE,
        ));
        log.push(Connection::new(
            SourceLocation::ManagedObject(ObjectIndex(0)),
            ObjectIndex(1),
            Provenance::field(FieldIndex(3)),
        ));

        let edges: Vec<_> = log.from_kind(SourceKind::ManagedObject).collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].provenance.field_index, Some(FieldIndex(3)));
    }

    #[test]
    fn reverse_indexes_cover_every_edge() {
        let mut log = ConnectionLog::default();
        for i in 0..6u32 {
            log.push(Connection::new(
                SourceLocation::ManagedObject(ObjectIndex(i % 2)),
                ObjectIndex(i % 3),
                Provenance::NONE,
            ));
        }
        let maps = ConnectionIndexMaps::build(&log);
        assert_eq!(maps.source_count(), 2);
        assert_eq!(maps.target_count(), 3);

        let total: usize = (0..3).map(|t| maps.to_target(ObjectIndex(t)).len()).sum();
        assert_eq!(total, log.len());
        assert_eq!(
            maps.from_source(SourceLocation::ManagedObject(ObjectIndex(1))),
            &[1, 3, 5]
        );
    }

    #[test]
    fn provenance_builders() {
        let nested = Provenance {
            field_index: Some(FieldIndex(1)),
            value_type_owner: Some(TypeIndex(4)),
            value_type_field_index: Some(FieldIndex(9)),
            offset_within_value_type: 8,
            array_index: None,
        };
        assert!(nested.is_nested());
        assert_eq!(nested.with_array_index(3).array_index, Some(3));
        assert!(!Provenance::field(FieldIndex(0)).is_nested());
        assert_eq!(Provenance::array_element(2).array_index, Some(2));
    }
}
