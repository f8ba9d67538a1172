use honggfuzz::fuzz;
use recompress::container::{self, Entries};

fn main() {
    loop {
        fuzz!(|data: &[u8]| {
            let plausible = container::sniff(data);
            if let Ok(entries) = Entries::new(data) {
                let declared = entries.declared();
                let ok = entries.take_while(|e| e.is_ok()).count();
                assert!(ok as u64 <= declared as u64);
            }
            if plausible {
                let _ = container::decode(data);
            }
        });
    }
}
