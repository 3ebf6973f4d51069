pub use tokio_util;

use std::marker::PhantomData;

use bytes::BytesMut;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Length-delimited bincode framing, typed per direction: `E` is what this
/// side sends, `D` is what it expects to receive.
pub struct BincodeCodec<E, D> {
    len_codec: LengthDelimitedCodec,
    _marker: PhantomData<fn(E) -> D>,
}

impl<E, D> BincodeCodec<E, D> {
    pub fn new() -> Self {
        Self {
            len_codec: LengthDelimitedCodec::new(),
            _marker: PhantomData,
        }
    }
}

impl<E, D> Default for BincodeCodec<E, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Serialize, D> Encoder<E> for BincodeCodec<E, D> {
    type Error = anyhow::Error;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let msg = bincode::serialize(&item)?;
        self.len_codec.encode(msg.into(), dst)?;
        Ok(())
    }
}

impl<E, D: DeserializeOwned> Decoder for BincodeCodec<E, D> {
    type Item = D;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.len_codec.decode(src)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_survive_a_round_trip() {
        let mut tx = BincodeCodec::<(String, u32), ()>::new();
        let mut rx = BincodeCodec::<(), (String, u32)>::new();

        let mut buf = BytesMut::new();
        tx.encode(("hello".to_string(), 7), &mut buf).unwrap();
        tx.encode(("again".to_string(), 8), &mut buf).unwrap();

        assert_eq!(rx.decode(&mut buf).unwrap(), Some(("hello".to_string(), 7)));
        assert_eq!(rx.decode(&mut buf).unwrap(), Some(("again".to_string(), 8)));
        assert_eq!(rx.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut tx = BincodeCodec::<(String, u32), ()>::new();
        let mut rx = BincodeCodec::<(), (String, u32)>::new();

        let mut buf = BytesMut::new();
        tx.encode(("partial".to_string(), 1), &mut buf).unwrap();
        let tail = buf.split_off(buf.len() - 2);

        assert_eq!(rx.decode(&mut buf).unwrap(), None);
        buf.unsplit(tail);
        assert_eq!(
            rx.decode(&mut buf).unwrap(),
            Some(("partial".to_string(), 1))
        );
    }
}
