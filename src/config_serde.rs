//! Serde helpers so configuration files express durations as milliseconds

/// `Duration` <-> integer milliseconds
pub mod duration_ms {
	use serde::{Deserialize, Deserializer, Serializer};
	use std::time::Duration;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where S: Serializer {
		serializer.serialize_u64(duration.as_millis() as u64)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where D: Deserializer<'de> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

/// `BTreeMap<K, Duration>` <-> map of integer milliseconds
pub mod duration_map_ms {
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use std::collections::BTreeMap;
	use std::time::Duration;

	pub fn serialize<K, S>(map: &BTreeMap<K, Duration>, serializer: S) -> Result<S::Ok, S::Error>
	where
		K: Serialize + Ord,
		S: Serializer,
	{
		let millis: BTreeMap<&K, u64> =
			map.iter().map(|(key, duration)| (key, duration.as_millis() as u64)).collect();
		millis.serialize(serializer)
	}

	pub fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, Duration>, D::Error>
	where
		K: Deserialize<'de> + Ord,
		D: Deserializer<'de>,
	{
		let millis = BTreeMap::<K, u64>::deserialize(deserializer)?;
		Ok(millis.into_iter().map(|(key, ms)| (key, Duration::from_millis(ms))).collect())
	}
}
