//! The blocking send path (§4.1 `send`).

use crate::comm::Comm;
use crate::error::CommError;
use crate::frame::encode_header;
use crate::window::stage_bytes;

impl Comm {
    /// Enqueues `payload` for delivery to `target`, blocking until every byte of the frame —
    /// header and payload — has been staged into the current send group. The message
    /// becomes visible to `target` only after a flush carries it across.
    pub fn send(&self, target: usize, payload: &[u8]) -> Result<(), CommError> {
        if target >= self.size() {
            return Err(CommError::InvalidArgument(format!(
                "target {target} out of range for a group of size {}",
                self.size()
            )));
        }
        if payload.is_empty() {
            return Err(CommError::InvalidArgument(
                "send payload must be non-empty".into(),
            ));
        }

        let header = encode_header(payload.len());
        self.stage_all(target, &header)?;
        self.stage_all(target, payload)?;
        Ok(())
    }

    /// Repeatedly stages `bytes` into the current group, forcing a flush whenever the
    /// target's slot is saturated. A saturation stall (`stage_bytes` returning 0) is not an
    /// error — the caller just loops through a flush and retries.
    fn stage_all(&self, target: usize, mut bytes: &[u8]) -> Result<(), CommError> {
        while !bytes.is_empty() {
            let consumed = stage_bytes(self.groups(), target, bytes, self.config().element_size);
            if consumed == 0 {
                self.flush()?;
                continue;
            }
            bytes = &bytes[consumed..];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::transport::thread::ThreadTransport;
    use crate::Comm;

    #[test]
    fn send_across_a_flush_boundary_arrives_whole() {
        let transports = ThreadTransport::new_group(2);
        let config = Config {
            window_bytes: 32,
            element_size: 8,
            ..Config::default()
        };
        let handles: Vec<_> = transports
            .into_iter()
            .map(|t| {
                let config = config.clone();
                std::thread::spawn(move || {
                    let comm = Comm::new(Arc::new(t), config).unwrap();
                    if comm.rank() == 0 {
                        comm.send(1, b"a message longer than one slot's single capacity").unwrap();
                        comm.flush().unwrap();
                    } else {
                        let mut got = None;
                        while got.is_none() {
                            got = comm.receive(0);
                            comm.flush().unwrap();
                        }
                        assert_eq!(got.unwrap(), b"a message longer than one slot's single capacity");
                    }
                    comm.close().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn rejects_an_out_of_range_target() {
        let transports = ThreadTransport::new_group(1);
        let comm = Comm::new(Arc::new(transports.into_iter().next().unwrap()), Config::default()).unwrap();
        assert!(comm.send(1, b"hi").is_err());
        comm.close().unwrap();
    }

    #[test]
    fn rejects_an_empty_payload() {
        let transports = ThreadTransport::new_group(1);
        let comm = Comm::new(Arc::new(transports.into_iter().next().unwrap()), Config::default()).unwrap();
        assert!(comm.send(0, b"").is_err());
        comm.close().unwrap();
    }
}
