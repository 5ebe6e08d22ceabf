use sha2::{Digest, Sha256};

const PHONE_LABEL_HEX_CHARS: usize = 12;

/// Stable, non-reversible label for a phone number in logs.
pub fn phone_label(phone: &str) -> String {
    let digest = Sha256::digest(phone.as_bytes());
    let mut label = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    label.truncate(PHONE_LABEL_HEX_CHARS);
    format!("ph_{label}")
}
