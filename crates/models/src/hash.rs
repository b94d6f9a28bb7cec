/// The SHA-1 hash of a commit, in its binary form.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitHash([u8; 20]);

impl CommitHash {
    pub fn new(b: [u8; 20]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_hex<T: AsRef<[u8]>>(hex: T) -> Result<Self, crate::Error> {
        let raw = hex::decode(hex.as_ref())
            .map_err(|_| crate::Error::InvalidHash(String::from_utf8_lossy(hex.as_ref()).into()))?;
        let exact: [u8; 20] = raw
            .as_slice()
            .try_into()
            .map_err(|_| crate::Error::InvalidHash(String::from_utf8_lossy(hex.as_ref()).into()))?;

        Ok(CommitHash(exact))
    }
}

impl std::str::FromStr for CommitHash {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommitHash::from_hex(s)
    }
}

impl std::fmt::Display for CommitHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for CommitHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl serde::Serialize for CommitHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        format!("{self}").serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for CommitHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let str_val = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        CommitHash::from_hex(str_val.as_ref())
            .map_err(|err| D::Error::custom(format!("invalid commit hash: {err}")))
    }
}
