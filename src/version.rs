/// WhatsApp Web client version advertised during login and registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaVersion {
    pub primary: u32,
    pub secondary: u32,
    pub tertiary: u32,
}

impl WaVersion {
    /// Pinned snapshot of the web client version.
    pub const fn pinned() -> Self {
        Self {
            primary: 2,
            secondary: 3000,
            tertiary: 1015901307,
        }
    }

    /// MD5 over the dotted version string, sent as the registration build hash.
    pub fn build_hash(&self) -> [u8; 16] {
        md5::compute(format!(
            "{}.{}.{}",
            self.primary, self.secondary, self.tertiary
        ))
        .0
    }
}

impl Default for WaVersion {
    fn default() -> Self {
        Self::pinned()
    }
}
