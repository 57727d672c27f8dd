//! Flat little-endian binary save and load.
//!
//! ## Layout
//!
//! ```text
//! i32 activation_threshold
//! i32 class_count
//! i32 max_input_activations
//! f64 synapse_success_probability
//! i32 units_per_class
//! i32 layer_count
//! i32 unit_count            × layer_count
//! per connection layer, per left unit:
//!     i32 edge_count
//!     (i32 target, u8 weight + 66)  × edge_count
//! i32 min_weight            (absent in old files → -1)
//! i32 max_weight            (absent in old files →  1)
//! ```
//!
//! Loading checks the layer layout before allocating any store: a
//! connection layer may hold at most [`MAX_LAYER_EDGES`] edges and the last
//! layer must have `class_count * units_per_class` units.
//!
//! Weight bytes below 5 come from an older format that stored edge kinds
//! instead of weights; they decode to `{2 → 1, 4 → -1, other → 0}`.
//!
//! Every adjacency block is encoded into memory before it is written, so a
//! failed encode never leaves a half-written block behind.

use crate::connections::{ConnectionStore, Partition};
use crate::core::{output_units, BionnError, BionnResult, Network, NetworkParams};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tracing::{info, warn};

/// Added to a weight before it is stored as a byte.
pub const WEIGHT_OFFSET: i32 = 66;

/// Bytes below this value use the legacy edge-kind encoding.
pub const LEGACY_LIMIT: u8 = 5;

/// Largest `left × right` connection layer accepted when loading.
pub const MAX_LAYER_EDGES: usize = 1 << 28;

/// Decode one stored weight byte.
#[must_use]
pub fn decode_weight(byte: u8) -> i32 {
    if byte < LEGACY_LIMIT {
        match byte {
            2 => 1,
            4 => -1,
            _ => 0,
        }
    } else {
        i32::from(byte) - WEIGHT_OFFSET
    }
}

/// Encode one weight, failing when it does not fit the modern byte range.
///
/// # Errors
/// - `Format` if `weight + 66` is outside `5..=255`
pub fn encode_weight(weight: i32) -> BionnResult<u8> {
    u8::try_from(weight + WEIGHT_OFFSET)
        .ok()
        .filter(|&byte| byte >= LEGACY_LIMIT)
        .ok_or_else(|| {
            BionnError::Format(format!(
                "weight {weight} cannot be stored (supported range {}..={})",
                i32::from(LEGACY_LIMIT) - WEIGHT_OFFSET,
                i32::from(u8::MAX) - WEIGHT_OFFSET
            ))
        })
}

fn to_i32(what: &str, value: usize) -> BionnResult<i32> {
    i32::try_from(value).map_err(|_| BionnError::Format(format!("{what} {value} exceeds i32")))
}

fn to_usize(what: &str, value: i32) -> BionnResult<usize> {
    usize::try_from(value).map_err(|_| BionnError::Format(format!("negative {what}: {value}")))
}

/// Reject layouts whose stores would be empty, oversized, or disagree with
/// the stored class layout.
fn check_layout(unit_counts: &[usize], class_count: usize, units_per_class: usize) -> BionnResult<()> {
    if let Some(layer) = unit_counts.iter().position(|&n| n == 0) {
        return Err(BionnError::Format(format!("layer {layer} has no units")));
    }
    for (layer, pair) in unit_counts.windows(2).enumerate() {
        let edges = pair[0]
            .checked_mul(pair[1])
            .filter(|&edges| edges <= MAX_LAYER_EDGES);
        if edges.is_none() {
            return Err(BionnError::Format(format!(
                "connection layer {layer} ({}x{}) exceeds {MAX_LAYER_EDGES} edges",
                pair[0], pair[1]
            )));
        }
    }
    let outputs = unit_counts[unit_counts.len() - 1];
    let expected =
        output_units(class_count, units_per_class).map_err(|err| BionnError::Format(err.to_string()))?;
    if outputs != expected {
        return Err(BionnError::Format(format!(
            "output layer has {outputs} units, {class_count} classes of {units_per_class} need {expected}"
        )));
    }
    Ok(())
}

fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}

fn read_f64<R: Read>(reader: &mut R) -> io::Result<f64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(f64::from_le_bytes(bytes))
}

fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

/// Truncated payloads are corrupt data, not I/O failures.
fn truncated(err: io::Error) -> BionnError {
    if err.kind() == ErrorKind::UnexpectedEof {
        BionnError::Format("unexpected end of network data".to_string())
    } else {
        BionnError::Io(err)
    }
}

impl<S: ConnectionStore> Network<S> {
    /// Write the network in the binary layout above.
    ///
    /// Every edge is written, zero weights included.
    ///
    /// # Errors
    /// - `Format` if a count or weight does not fit its field
    /// - `Io` if the writer fails
    pub fn save<W: Write>(&self, mut writer: W) -> BionnResult<()> {
        let params = &self.params;
        let mut header = Vec::with_capacity(32 + 4 * self.unit_counts.len());
        header.extend_from_slice(&params.activation_threshold.to_le_bytes());
        header.extend_from_slice(&to_i32("class count", params.class_count)?.to_le_bytes());
        header.extend_from_slice(
            &to_i32("max input activations", params.max_input_activations)?.to_le_bytes(),
        );
        header.extend_from_slice(&params.synapse_success_probability.to_le_bytes());
        header.extend_from_slice(&to_i32("units per class", params.units_per_class)?.to_le_bytes());
        header.extend_from_slice(&to_i32("layer count", self.layer_count())?.to_le_bytes());
        for &count in &self.unit_counts {
            header.extend_from_slice(&to_i32("unit count", count)?.to_le_bytes());
        }
        writer.write_all(&header)?;

        for store in &self.connections {
            let mut block = Vec::new();
            for left in 0..store.left_count() {
                let edges: Vec<_> = store.neighbours(left, Partition::Left, false)?.collect();
                block.extend_from_slice(&to_i32("edge count", edges.len())?.to_le_bytes());
                for edge in edges {
                    block.extend_from_slice(&to_i32("unit index", edge.target)?.to_le_bytes());
                    block.push(encode_weight(edge.weight)?);
                }
            }
            writer.write_all(&block)?;
        }

        writer.write_all(&params.min_weight.to_le_bytes())?;
        writer.write_all(&params.max_weight.to_le_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Read a network written by [`Network::save`] or by the older format
    /// without trailing weight bounds. A file that ends after `min_weight`
    /// keeps that minimum and uses a maximum of 1.
    ///
    /// Thresholds start at the stored activation threshold and the random
    /// source is seeded from OS entropy.
    ///
    /// # Errors
    /// - `Format` for truncated or inconsistent data, or a layer layout that
    ///   does not match the stored classes or exceeds [`MAX_LAYER_EDGES`]
    /// - `Io` if the reader fails
    /// - `InvalidConfig` / `InvalidProbability` if the stored parameters are invalid
    pub fn load<R: Read>(mut reader: R) -> BionnResult<Self> {
        let reader = &mut reader;
        let activation_threshold = read_i32(reader).map_err(truncated)?;
        let class_count = to_usize("class count", read_i32(reader).map_err(truncated)?)?;
        let max_input_activations =
            to_usize("max input activations", read_i32(reader).map_err(truncated)?)?;
        let synapse_success_probability = read_f64(reader).map_err(truncated)?;
        let units_per_class = to_usize("units per class", read_i32(reader).map_err(truncated)?)?;
        let layer_count = to_usize("layer count", read_i32(reader).map_err(truncated)?)?;
        if layer_count < 2 {
            return Err(BionnError::Format(format!(
                "a network needs at least 2 layers, file has {layer_count}"
            )));
        }

        let mut unit_counts = Vec::new();
        for _ in 0..layer_count {
            unit_counts.push(to_usize("unit count", read_i32(reader).map_err(truncated)?)?);
        }
        check_layout(&unit_counts, class_count, units_per_class)?;

        let mut connections = Vec::with_capacity(unit_counts.len() - 1);
        for pair in unit_counts.windows(2) {
            let mut store = S::new(pair[0], pair[1])?;
            for left in 0..pair[0] {
                let edge_count = to_usize("edge count", read_i32(reader).map_err(truncated)?)?;
                for _ in 0..edge_count {
                    let target = to_usize("unit index", read_i32(reader).map_err(truncated)?)?;
                    let weight = decode_weight(read_u8(reader).map_err(truncated)?);
                    store.set_edge(left, target, weight).map_err(|err| match err {
                        BionnError::OutOfBounds { .. } => BionnError::Format(err.to_string()),
                        other => other,
                    })?;
                }
            }
            connections.push(store);
        }

        let (min_weight, max_weight) = match read_i32(reader) {
            Ok(min_weight) => match read_i32(reader) {
                Ok(max_weight) => (min_weight, max_weight),
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                    warn!(min_weight, "network data has no maximum weight, assuming 1");
                    (min_weight, 1)
                }
                Err(err) => return Err(err.into()),
            },
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                warn!("network data has no weight bounds, assuming -1..1");
                (-1, 1)
            }
            Err(err) => return Err(err.into()),
        };

        let params = NetworkParams {
            activation_threshold,
            class_count,
            units_per_class,
            max_input_activations,
            synapse_success_probability,
            min_weight,
            max_weight,
        };
        let network = Self::from_parts(params, unit_counts, connections, None)?;
        info!(layers = network.layer_count(), "loaded network");
        Ok(network)
    }

    /// Save to `path`, creating parent directories as needed.
    ///
    /// # Errors
    /// See [`Network::save`].
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> BionnResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.save(BufWriter::new(File::create(path)?))?;
        info!(path = %path.display(), "saved network");
        Ok(())
    }

    /// # Errors
    /// See [`Network::load`].
    pub fn load_from_file(path: impl AsRef<Path>) -> BionnResult<Self> {
        Self::load(BufReader::new(File::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::{DenseConnections, SparseConnections};
    use crate::NetworkConfig;

    fn params() -> NetworkParams {
        let mut config = NetworkConfig::with_layers(2, vec![], 1, 2);
        config.activation_threshold = 2;
        config.max_input_activations = 7;
        config.synapse_success_probability = 0.5;
        NetworkParams::from(&config)
    }

    fn tiny() -> Network {
        let mut store = DenseConnections::new(2, 2).unwrap();
        store.set_edge(0, 1, 1).unwrap();
        store.set_edge(1, 0, -1).unwrap();
        Network::from_parts(params(), vec![2, 2], vec![store], Some(1)).unwrap()
    }

    /// Hand-encoded old file: one 2x2 layer, no trailing weight bounds.
    fn legacy_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        for value in [2i32, 1, 7] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&0.5f64.to_le_bytes());
        for value in [2i32, 2, 2, 2] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        // left 0: one edge to 1 with legacy kind 2 (excitatory)
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.push(2);
        // left 1: edge to 0 with legacy kind 4 (inhibitory), edge to 1 with modern 66
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.push(4);
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.push(66);
        bytes
    }

    /// Header of a one-class file, cut off right after the unit counts.
    fn header(units_per_class: i32, unit_counts: &[i32]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for value in [2i32, 1, 7] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&0.5f64.to_le_bytes());
        bytes.extend_from_slice(&units_per_class.to_le_bytes());
        bytes.extend_from_slice(&i32::try_from(unit_counts.len()).unwrap().to_le_bytes());
        for value in unit_counts {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_decode_weight() {
        assert_eq!(decode_weight(0), 0);
        assert_eq!(decode_weight(2), 1);
        assert_eq!(decode_weight(3), 0);
        assert_eq!(decode_weight(4), -1);
        assert_eq!(decode_weight(65), -1);
        assert_eq!(decode_weight(66), 0);
        assert_eq!(decode_weight(70), 4);
    }

    #[test]
    fn test_encode_weight_range() {
        assert_eq!(encode_weight(-1).unwrap(), 65);
        assert_eq!(encode_weight(-61).unwrap(), 5);
        assert!(encode_weight(-62).is_err());
        assert_eq!(encode_weight(189).unwrap(), 255);
        assert!(encode_weight(190).is_err());
    }

    #[test]
    fn test_layout() {
        let mut bytes = Vec::new();
        tiny().save(&mut bytes).unwrap();
        // header 28 + unit counts 8 + two adjacency rows of (4 + 2 · 5) + trailer 8
        assert_eq!(bytes.len(), 36 + 2 * 14 + 8);
        assert_eq!(&bytes[..4], &2i32.to_le_bytes());
        assert_eq!(&bytes[12..20], &0.5f64.to_le_bytes());
        // first row: count 2, (0, 66), (1, 67)
        assert_eq!(&bytes[36..40], &2i32.to_le_bytes());
        assert_eq!(bytes[44], 66);
        assert_eq!(bytes[49], 67);
        assert_eq!(&bytes[bytes.len() - 8..bytes.len() - 4], &(-1i32).to_le_bytes());
    }

    #[test]
    fn test_round_trip() {
        let network = tiny();
        let mut bytes = Vec::new();
        network.save(&mut bytes).unwrap();
        let loaded = Network::<DenseConnections>::load(bytes.as_slice()).unwrap();
        assert_eq!(loaded.params(), network.params());
        assert_eq!(loaded.unit_counts(), network.unit_counts());
        assert_eq!(loaded.all_weights(0).unwrap(), network.all_weights(0).unwrap());
    }

    #[test]
    fn test_round_trip_across_backings() {
        let mut bytes = Vec::new();
        tiny().save(&mut bytes).unwrap();
        let sparse = Network::<SparseConnections>::load(bytes.as_slice()).unwrap();
        assert_eq!(sparse.all_weights(0).unwrap(), vec![0, 1, -1, 0]);
        assert_eq!(sparse.connections(0).unwrap().non_zero_count(), 2);
    }

    #[test]
    fn test_legacy_file_without_bounds() {
        let loaded = Network::<DenseConnections>::load(legacy_bytes().as_slice()).unwrap();
        assert_eq!(loaded.min_weight(), -1);
        assert_eq!(loaded.max_weight(), 1);
        assert_eq!(loaded.all_weights(0).unwrap(), vec![0, 1, -1, 0]);
        assert_eq!(loaded.activation_threshold(), 2);
        assert_eq!(loaded.thresholds().get(1, 0), Some(2));
    }

    #[test]
    fn test_truncated_data_is_format_error() {
        let bytes = legacy_bytes();
        let result = Network::<DenseConnections>::load(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(BionnError::Format(_))));
        let result = Network::<DenseConnections>::load(&bytes[..10]);
        assert!(matches!(result, Err(BionnError::Format(_))));
    }

    #[test]
    fn test_target_out_of_range_is_format_error() {
        let mut bytes = legacy_bytes();
        // retarget the first edge to unit 9
        bytes[40..44].copy_from_slice(&9i32.to_le_bytes());
        assert!(matches!(
            Network::<DenseConnections>::load(bytes.as_slice()),
            Err(BionnError::Format(_))
        ));
    }

    #[test]
    fn test_oversized_layers_are_rejected_before_allocation() {
        let bytes = header(i32::MAX, &[i32::MAX, i32::MAX]);
        assert!(matches!(
            Network::<DenseConnections>::load(bytes.as_slice()),
            Err(BionnError::Format(_))
        ));
        assert!(matches!(
            Network::<SparseConnections>::load(bytes.as_slice()),
            Err(BionnError::Format(_))
        ));
    }

    #[test]
    fn test_huge_layer_count_is_truncation() {
        let mut bytes = header(2, &[2, 2]);
        bytes[24..28].copy_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(
            Network::<DenseConnections>::load(bytes.as_slice()),
            Err(BionnError::Format(_))
        ));
    }

    #[test]
    fn test_output_layer_must_match_classes() {
        let mut bytes = header(3, &[2, 2]);
        bytes.extend_from_slice(&legacy_bytes()[36..]);
        assert!(matches!(
            Network::<DenseConnections>::load(bytes.as_slice()),
            Err(BionnError::Format(_))
        ));
        assert!(matches!(
            Network::<DenseConnections>::load(header(2, &[0, 2]).as_slice()),
            Err(BionnError::Format(_))
        ));
    }

    #[test]
    fn test_missing_max_weight_defaults_to_one() {
        let mut bytes = legacy_bytes();
        bytes.extend_from_slice(&(-2i32).to_le_bytes());
        let loaded = Network::<DenseConnections>::load(bytes.as_slice()).unwrap();
        assert_eq!((loaded.min_weight(), loaded.max_weight()), (-2, 1));
        assert_eq!(loaded.all_weights(0).unwrap(), vec![0, 1, -1, 0]);
    }
}
