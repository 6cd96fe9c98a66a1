//! TLS 1.2 client (RFC 5246), restricted to the one cipher suite this
//! kernel ever negotiates: `TLS_RSA_WITH_AES_128_CBC_SHA256` (wire value
//! `0x003C`). No renegotiation, no session resumption, no certificate
//! chain validation beyond pulling the RSA public key out of the leaf
//! certificate the server presents — this is a client for talking to one
//! pinned, trusted host, not a general-purpose TLS stack.
//!
//! The nine-message handshake this module drives:
//! 1. ClientHello ->
//! 2. <- ServerHello
//! 3. <- Certificate
//! 4. <- ServerHelloDone
//! 5. ClientKeyExchange ->
//! 6. ChangeCipherSpec ->
//! 7. Finished ->
//! 8. <- ChangeCipherSpec
//! 9. <- Finished

use alloc::vec::Vec;

use crate::crypto::{hmac_sha256, random::random_bytes, sha256, tls_prf, Aes128Cbc};

const TLS_MAJOR: u8 = 3;
const TLS_MINOR: u8 = 3; // TLS 1.2

const CIPHER_SUITE_RSA_AES128_CBC_SHA256: u16 = 0x003C;

const CONTENT_CHANGE_CIPHER_SPEC: u8 = 20;
#[allow(dead_code)] // alerts aren't sent yet; fatal errors just drop the connection
const CONTENT_ALERT: u8 = 21;
const CONTENT_HANDSHAKE: u8 = 22;
const CONTENT_APPLICATION_DATA: u8 = 23;

const HS_CLIENT_HELLO: u8 = 1;
const HS_SERVER_HELLO: u8 = 2;
const HS_CERTIFICATE: u8 = 11;
const HS_SERVER_HELLO_DONE: u8 = 14;
const HS_CLIENT_KEY_EXCHANGE: u8 = 16;
const HS_FINISHED: u8 = 20;

const MASTER_SECRET_LEN: usize = 48;
const CLIENT_RANDOM_LEN: usize = 32;
const MAC_KEY_LEN: usize = 32; // HMAC-SHA256
const ENC_KEY_LEN: usize = 16; // AES-128

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsError {
    Transport,
    UnexpectedMessage,
    UnsupportedCipherSuite,
    DecodeError,
    BadMac,
    BadFinished,
    Crypto,
}

impl core::fmt::Display for TlsError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            TlsError::Transport => write!(f, "transport error"),
            TlsError::UnexpectedMessage => write!(f, "unexpected handshake message"),
            TlsError::UnsupportedCipherSuite => write!(f, "server chose an unsupported cipher suite"),
            TlsError::DecodeError => write!(f, "malformed TLS message"),
            TlsError::BadMac => write!(f, "record MAC verification failed"),
            TlsError::BadFinished => write!(f, "Finished verify_data mismatch"),
            TlsError::Crypto => write!(f, "cryptographic operation failed"),
        }
    }
}

impl From<crate::crypto::CryptoError> for TlsError {
    fn from(_: crate::crypto::CryptoError) -> Self {
        TlsError::Crypto
    }
}

/// Byte-stream transport a handshake runs over. `net::tcp::TcpConnection`
/// implements this; tests drive the protocol logic against an in-memory
/// pair instead.
pub trait Transport {
    fn send(&mut self, data: &[u8]) -> Result<(), TlsError>;
    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), TlsError>;
}

impl Transport for crate::net::tcp::TcpConnection {
    fn send(&mut self, data: &[u8]) -> Result<(), TlsError> {
        let mut sent = 0;
        while sent < data.len() {
            let n = self.send(&data[sent..]).map_err(|_| TlsError::Transport)?;
            if n == 0 {
                return Err(TlsError::Transport);
            }
            sent += n;
        }
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), TlsError> {
        let mut received = 0;
        while received < buf.len() {
            let n = self.recv(&mut buf[received..]).map_err(|_| TlsError::Transport)?;
            if n == 0 {
                return Err(TlsError::Transport);
            }
            received += n;
        }
        Ok(())
    }
}

/// Minimal-enough DER walking to pull an RSA public key out of a leaf
/// certificate's `SubjectPublicKeyInfo`: scans for the largest pair of
/// adjacent DER INTEGER values, which within `RSAPublicKey ::= SEQUENCE
/// { modulus INTEGER, publicExponent INTEGER }` is always the modulus
/// followed by the exponent. This is not a general ASN.1/X.509 parser —
/// it doesn't validate the certificate chain, signature, or validity
/// period, which this client doesn't need against a pinned host.
mod x509 {
    use alloc::vec::Vec;

    use super::TlsError;
    use crate::crypto::{BigNum, RsaPublicKey};

    const TAG_INTEGER: u8 = 0x02;
    const TAG_BIT_STRING: u8 = 0x03;

    struct Tlv<'a> {
        tag: u8,
        value: &'a [u8],
        next: usize,
    }

    fn read_tlv(buf: &[u8], pos: usize) -> Option<Tlv<'_>> {
        if pos >= buf.len() {
            return None;
        }
        let tag = buf[pos];
        let len_byte = *buf.get(pos + 1)?;
        let (len, header_len) = if len_byte & 0x80 == 0 {
            (len_byte as usize, 2)
        } else {
            let n = (len_byte & 0x7f) as usize;
            if n == 0 || n > 4 {
                return None;
            }
            let mut len = 0usize;
            for i in 0..n {
                len = (len << 8) | *buf.get(pos + 2 + i)? as usize;
            }
            (len, 2 + n)
        };
        let value_start = pos + header_len;
        let value_end = value_start.checked_add(len)?;
        if value_end > buf.len() {
            return None;
        }
        Some(Tlv { tag, value: &buf[value_start..value_end], next: value_end })
    }

    /// Strip a leading zero sign byte DER adds to positive integers whose
    /// high bit would otherwise read as negative.
    fn unsigned_bytes(value: &[u8]) -> &[u8] {
        if value.len() > 1 && value[0] == 0 {
            &value[1..]
        } else {
            value
        }
    }

    /// Depth-first collection of every INTEGER value anywhere in `der`,
    /// in document order. Constructed types (SEQUENCE, SET, and BIT
    /// STRING wrapping a nested SEQUENCE, as `subjectPublicKey` does) are
    /// walked into; other primitives are skipped.
    fn collect_integers<'a>(der: &'a [u8], out: &mut Vec<&'a [u8]>) {
        let mut pos = 0;
        while let Some(tlv) = read_tlv(der, pos) {
            if tlv.tag == TAG_INTEGER {
                out.push(tlv.value);
            } else if tlv.tag & 0x20 != 0 {
                let inner = if tlv.tag == TAG_BIT_STRING && !tlv.value.is_empty() {
                    &tlv.value[1..] // unused-bits count prefix
                } else {
                    tlv.value
                };
                collect_integers(inner, out);
            }
            pos = tlv.next;
        }
    }

    /// Pull the RSA public key out of a certificate's DER bytes: within
    /// `RSAPublicKey ::= SEQUENCE { modulus INTEGER, publicExponent
    /// INTEGER }`, the modulus is always immediately followed by the
    /// exponent, and it dwarfs every other INTEGER the certificate
    /// contains (serial number, version, etc.), so the largest adjacent
    /// pair found anywhere in the structure is the key.
    pub fn extract_rsa_public_key(der: &[u8]) -> Result<RsaPublicKey, TlsError> {
        let mut integers = Vec::new();
        collect_integers(der, &mut integers);

        let mut best: Option<(&[u8], &[u8])> = None;
        for pair in integers.windows(2) {
            let modulus = unsigned_bytes(pair[0]);
            let exponent = unsigned_bytes(pair[1]);
            if modulus.len() >= 64 && !exponent.is_empty() && exponent.len() <= 8 {
                let better = match best {
                    Some((m, _)) => modulus.len() > m.len(),
                    None => true,
                };
                if better {
                    best = Some((modulus, exponent));
                }
            }
        }

        let (modulus, exponent) = best.ok_or(TlsError::DecodeError)?;
        let n = BigNum::from_be_bytes(modulus).map_err(|_| TlsError::DecodeError)?;
        let e = BigNum::from_be_bytes(exponent).map_err(|_| TlsError::DecodeError)?;
        Ok(RsaPublicKey::new(n, e))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn der_integer(value: &[u8]) -> Vec<u8> {
            let mut out = alloc::vec![TAG_INTEGER, value.len() as u8];
            out.extend_from_slice(value);
            out
        }

        fn der_sequence(body: &[u8]) -> Vec<u8> {
            let mut out = alloc::vec![0x30u8, body.len() as u8];
            out.extend_from_slice(body);
            out
        }

        #[test]
        fn finds_modulus_exponent_pair_inside_nested_sequences() {
            let mut modulus = alloc::vec![0u8; 65];
            modulus[0] = 0x00; // DER sign byte
            modulus[1] = 0xaa;
            let exponent = alloc::vec![0x01, 0x00, 0x01]; // 65537

            let rsa_public_key = der_sequence(&[der_integer(&modulus), der_integer(&exponent)].concat());
            let serial = der_integer(&[0x01]);
            let cert = der_sequence(&[serial, rsa_public_key].concat());

            let key = extract_rsa_public_key(&cert).unwrap();
            assert_eq!(key.e.words[0], 0x10001);
        }
    }
}

/// Growing buffer of every handshake message exchanged so far, used to
/// compute the `Finished` verify_data hash (RFC 5246 §7.4.9: over every
/// handshake message's bytes, ClientHello through the peer's last
/// message before this one, never the record-layer framing).
#[derive(Default)]
struct HandshakeTranscript(Vec<u8>);

impl HandshakeTranscript {
    fn push(&mut self, msg: &[u8]) {
        self.0.extend_from_slice(msg);
    }

    fn hash(&self) -> crate::crypto::Hash256 {
        sha256(&self.0)
    }
}

fn handshake_header(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.push(msg_type);
    let len = body.len() as u32;
    out.push((len >> 16) as u8);
    out.push((len >> 8) as u8);
    out.push(len as u8);
    out.extend_from_slice(body);
    out
}

fn record_header(content_type: u8, len: usize) -> [u8; 5] {
    [content_type, TLS_MAJOR, TLS_MINOR, (len >> 8) as u8, len as u8]
}

/// Per-direction keys and sequence number the record layer uses to
/// seal/open application data and post-ChangeCipherSpec handshake
/// messages.
struct RecordKeys {
    mac_key: [u8; MAC_KEY_LEN],
    enc_key: [u8; ENC_KEY_LEN],
    seq: u64,
}

impl RecordKeys {
    fn mac_input(&self, content_type: u8, fragment: &[u8]) -> Vec<u8> {
        let mut input = Vec::with_capacity(8 + 5 + fragment.len());
        input.extend_from_slice(&self.seq.to_be_bytes());
        input.extend_from_slice(&record_header(content_type, fragment.len()));
        input.extend_from_slice(fragment);
        input
    }

    /// Seal one TLS record: MAC-then-encrypt with a random explicit IV
    /// (RFC 5246 §6.2.3.2), returning the on-wire fragment (IV ||
    /// ciphertext) to follow the 5-byte record header.
    fn seal(&mut self, content_type: u8, plaintext: &[u8]) -> Vec<u8> {
        let mac = hmac_sha256(&self.mac_key, &self.mac_input(content_type, plaintext));
        let mut payload = Vec::with_capacity(plaintext.len() + 32);
        payload.extend_from_slice(plaintext);
        payload.extend_from_slice(mac.as_bytes());

        let iv_bytes = random_bytes(16);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&iv_bytes);

        let cipher = Aes128Cbc::new(&self.enc_key).expect("16-byte AES-128 key");
        let ciphertext = cipher.encrypt(&iv, &payload);

        self.seq += 1;
        let mut out = Vec::with_capacity(16 + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Open one TLS record fragment (IV || ciphertext), returning the
    /// plaintext with the MAC verified and stripped.
    fn open(&mut self, content_type: u8, fragment: &[u8]) -> Result<Vec<u8>, TlsError> {
        if fragment.len() < 16 + 32 {
            return Err(TlsError::DecodeError);
        }
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&fragment[..16]);
        let cipher = Aes128Cbc::new(&self.enc_key).map_err(|_| TlsError::Crypto)?;
        let padded = cipher.decrypt(&iv, &fragment[16..]).map_err(|_| TlsError::BadMac)?;
        if padded.len() < 32 {
            return Err(TlsError::DecodeError);
        }
        let (data, mac) = padded.split_at(padded.len() - 32);

        let expected = hmac_sha256(&self.mac_key, &self.mac_input(content_type, data));
        if crate::crypto::constant_time::ct_eq_bytes(expected.as_bytes(), mac) != 1 {
            return Err(TlsError::BadMac);
        }
        self.seq += 1;
        Ok(data.to_vec())
    }
}

/// Key material derived from the master secret: four independent keys,
/// one pair of (mac, enc) per direction. TLS 1.1+ uses an explicit
/// per-record IV instead of an implicit one carried in the key block, so
/// there's no IV material to derive here.
struct KeyBlock {
    client: RecordKeys,
    server: RecordKeys,
}

fn derive_key_block(master_secret: &[u8], client_random: &[u8; 32], server_random: &[u8; 32]) -> KeyBlock {
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);
    let needed = 2 * MAC_KEY_LEN + 2 * ENC_KEY_LEN;
    let block = tls_prf(master_secret, b"key expansion", &seed, needed);

    let mut off = 0;
    let mut take = |n: usize| {
        let slice = &block[off..off + n];
        off += n;
        slice
    };

    let client_mac = take(MAC_KEY_LEN);
    let server_mac = take(MAC_KEY_LEN);
    let client_enc = take(ENC_KEY_LEN);
    let server_enc = take(ENC_KEY_LEN);

    let mut client_mac_key = [0u8; MAC_KEY_LEN];
    client_mac_key.copy_from_slice(client_mac);
    let mut server_mac_key = [0u8; MAC_KEY_LEN];
    server_mac_key.copy_from_slice(server_mac);
    let mut client_enc_key = [0u8; ENC_KEY_LEN];
    client_enc_key.copy_from_slice(client_enc);
    let mut server_enc_key = [0u8; ENC_KEY_LEN];
    server_enc_key.copy_from_slice(server_enc);

    KeyBlock {
        client: RecordKeys { mac_key: client_mac_key, enc_key: client_enc_key, seq: 0 },
        server: RecordKeys { mac_key: server_mac_key, enc_key: server_enc_key, seq: 0 },
    }
}

/// An established TLS session: application data read/write over the
/// negotiated record layer.
pub struct TlsSession<T: Transport> {
    transport: T,
    keys: KeyBlock,
}

impl<T: Transport> TlsSession<T> {
    pub fn write_application_data(&mut self, data: &[u8]) -> Result<(), TlsError> {
        let fragment = self.keys.client.seal(CONTENT_APPLICATION_DATA, data);
        let mut record = Vec::with_capacity(5 + fragment.len());
        record.extend_from_slice(&record_header(CONTENT_APPLICATION_DATA, fragment.len()));
        record.extend_from_slice(&fragment);
        self.transport.send(&record)
    }

    pub fn read_application_data(&mut self) -> Result<Vec<u8>, TlsError> {
        let fragment = read_record(&mut self.transport, CONTENT_APPLICATION_DATA)?;
        self.keys.server.open(CONTENT_APPLICATION_DATA, &fragment)
    }
}

fn read_record<T: Transport>(transport: &mut T, expected_type: u8) -> Result<Vec<u8>, TlsError> {
    let mut header = [0u8; 5];
    transport.recv_exact(&mut header)?;
    if header[0] != expected_type {
        return Err(TlsError::UnexpectedMessage);
    }
    let len = ((header[3] as usize) << 8) | header[4] as usize;
    let mut fragment = alloc::vec![0u8; len];
    transport.recv_exact(&mut fragment)?;
    Ok(fragment)
}

fn read_handshake_message<T: Transport>(
    transport: &mut T,
    transcript: &mut HandshakeTranscript,
    expected: u8,
) -> Result<Vec<u8>, TlsError> {
    let fragment = read_record(transport, CONTENT_HANDSHAKE)?;
    if fragment.len() < 4 {
        return Err(TlsError::DecodeError);
    }
    if fragment[0] != expected {
        return Err(TlsError::UnexpectedMessage);
    }
    let len = ((fragment[1] as usize) << 16) | ((fragment[2] as usize) << 8) | fragment[3] as usize;
    if fragment.len() != 4 + len {
        return Err(TlsError::DecodeError);
    }
    transcript.push(&fragment);
    Ok(fragment[4..].to_vec())
}

fn send_handshake_message<T: Transport>(
    transport: &mut T,
    transcript: &mut HandshakeTranscript,
    msg_type: u8,
    body: &[u8],
) -> Result<(), TlsError> {
    let message = handshake_header(msg_type, body);
    transcript.push(&message);
    let mut record = Vec::with_capacity(5 + message.len());
    record.extend_from_slice(&record_header(CONTENT_HANDSHAKE, message.len()));
    record.extend_from_slice(&message);
    transport.send(&record)
}

fn parse_server_hello(body: &[u8]) -> Result<[u8; 32], TlsError> {
    if body.len() < 2 + 32 + 1 {
        return Err(TlsError::DecodeError);
    }
    let mut random = [0u8; 32];
    random.copy_from_slice(&body[2..34]);
    let session_id_len = body[34] as usize;
    let cipher_start = 35 + session_id_len;
    if body.len() < cipher_start + 2 {
        return Err(TlsError::DecodeError);
    }
    let suite = ((body[cipher_start] as u16) << 8) | body[cipher_start + 1] as u16;
    if suite != CIPHER_SUITE_RSA_AES128_CBC_SHA256 {
        return Err(TlsError::UnsupportedCipherSuite);
    }
    Ok(random)
}

fn parse_certificate(body: &[u8]) -> Result<Vec<u8>, TlsError> {
    // certificate_list is a 3-byte-length-prefixed list of 3-byte-length-
    // prefixed DER certificates; the leaf is always first.
    if body.len() < 3 + 3 {
        return Err(TlsError::DecodeError);
    }
    let cert_len = ((body[3] as usize) << 16) | ((body[4] as usize) << 8) | body[5] as usize;
    if body.len() < 6 + cert_len {
        return Err(TlsError::DecodeError);
    }
    Ok(body[6..6 + cert_len].to_vec())
}

/// Run the full handshake against a connected transport and return an
/// established session ready for application data.
pub fn connect<T: Transport>(mut transport: T) -> Result<TlsSession<T>, TlsError> {
    let mut transcript = HandshakeTranscript::default();

    // 1. ClientHello ->
    let client_random_bytes = random_bytes(CLIENT_RANDOM_LEN);
    let mut client_random = [0u8; CLIENT_RANDOM_LEN];
    client_random.copy_from_slice(&client_random_bytes);

    let mut client_hello = Vec::new();
    client_hello.push(TLS_MAJOR);
    client_hello.push(TLS_MINOR);
    client_hello.extend_from_slice(&client_random);
    client_hello.push(0); // session_id length
    client_hello.extend_from_slice(&[0, 2]); // cipher_suites length
    client_hello.extend_from_slice(&CIPHER_SUITE_RSA_AES128_CBC_SHA256.to_be_bytes());
    client_hello.push(1); // compression_methods length
    client_hello.push(0); // null compression
    send_handshake_message(&mut transport, &mut transcript, HS_CLIENT_HELLO, &client_hello)?;

    // 2. <- ServerHello
    let server_hello = read_handshake_message(&mut transport, &mut transcript, HS_SERVER_HELLO)?;
    let server_random = parse_server_hello(&server_hello)?;

    // 3. <- Certificate
    let certificate = read_handshake_message(&mut transport, &mut transcript, HS_CERTIFICATE)?;
    let leaf_cert = parse_certificate(&certificate)?;
    let server_pubkey = x509::extract_rsa_public_key(&leaf_cert)?;

    // 4. <- ServerHelloDone
    read_handshake_message(&mut transport, &mut transcript, HS_SERVER_HELLO_DONE)?;

    // 5. ClientKeyExchange ->
    let mut premaster = Vec::with_capacity(MASTER_SECRET_LEN);
    premaster.push(TLS_MAJOR);
    premaster.push(TLS_MINOR);
    premaster.extend_from_slice(&random_bytes(MASTER_SECRET_LEN - 2));

    let padding = random_bytes(server_pubkey.modulus_len());
    let encrypted_premaster = server_pubkey.encrypt_pkcs1(&premaster, &padding)?;

    let mut cke_body = Vec::with_capacity(2 + encrypted_premaster.len());
    cke_body.extend_from_slice(&(encrypted_premaster.len() as u16).to_be_bytes());
    cke_body.extend_from_slice(&encrypted_premaster);
    send_handshake_message(&mut transport, &mut transcript, HS_CLIENT_KEY_EXCHANGE, &cke_body)?;

    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(&client_random);
    seed.extend_from_slice(&server_random);
    let master_secret = tls_prf(&premaster, b"master secret", &seed, MASTER_SECRET_LEN);

    let mut key_block = derive_key_block(&master_secret, &client_random, &server_random);

    // 6. ChangeCipherSpec ->
    transport.send(&[CONTENT_CHANGE_CIPHER_SPEC, TLS_MAJOR, TLS_MINOR, 0, 1, 1])?;

    // 7. Finished ->
    // RFC 5246 §7.4.9: verify_data = PRF(master_secret, "client finished",
    // Hash(handshake messages up to but not including this one)).
    let client_verify_hash = transcript.hash();
    let client_verify_data = tls_prf(&master_secret, b"client finished", client_verify_hash.as_bytes(), 12);
    let client_finished_message = handshake_header(HS_FINISHED, &client_verify_data);
    transcript.push(&client_finished_message);

    let sealed_finished = key_block.client.seal(CONTENT_HANDSHAKE, &client_finished_message);
    let mut finished_record = Vec::with_capacity(5 + sealed_finished.len());
    finished_record.extend_from_slice(&record_header(CONTENT_HANDSHAKE, sealed_finished.len()));
    finished_record.extend_from_slice(&sealed_finished);
    transport.send(&finished_record)?;

    // 8. <- ChangeCipherSpec
    let mut ccs = [0u8; 6];
    transport.recv_exact(&mut ccs)?;
    if ccs[0] != CONTENT_CHANGE_CIPHER_SPEC {
        return Err(TlsError::UnexpectedMessage);
    }

    // 9. <- Finished
    let server_finished_fragment = read_record(&mut transport, CONTENT_HANDSHAKE)?;
    let server_finished_plain = key_block.server.open(CONTENT_HANDSHAKE, &server_finished_fragment)?;
    if server_finished_plain.len() != 4 || server_finished_plain[0] != HS_FINISHED {
        return Err(TlsError::UnexpectedMessage);
    }
    // The server's verify_data covers everything through the client's
    // Finished, which is already in the transcript above.
    let server_verify_hash = transcript.hash();
    let expected_server_verify_data = tls_prf(&master_secret, b"server finished", server_verify_hash.as_bytes(), 12);
    if crate::crypto::constant_time::ct_eq_bytes(&server_finished_plain[4..], &expected_server_verify_data) != 1 {
        return Err(TlsError::BadFinished);
    }

    Ok(TlsSession { transport, keys: key_block })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::VecDeque;

    /// In-memory duplex pipe standing in for a TCP connection, so the
    /// record-layer and framing logic can be tested without a NIC.
    struct LoopbackPair {
        outgoing: VecDeque<u8>,
        incoming: VecDeque<u8>,
    }

    impl Transport for LoopbackPair {
        fn send(&mut self, data: &[u8]) -> Result<(), TlsError> {
            self.outgoing.extend(data.iter().copied());
            Ok(())
        }

        fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), TlsError> {
            if self.incoming.len() < buf.len() {
                return Err(TlsError::Transport);
            }
            for b in buf.iter_mut() {
                *b = self.incoming.pop_front().unwrap();
            }
            Ok(())
        }
    }

    #[test]
    fn record_layer_round_trips() {
        let mut sender = RecordKeys { mac_key: [0x11; 32], enc_key: [0x22; 16], seq: 0 };
        let mut receiver = RecordKeys { mac_key: [0x11; 32], enc_key: [0x22; 16], seq: 0 };

        let plaintext = b"application data payload";
        let sealed = sender.seal(CONTENT_APPLICATION_DATA, plaintext);
        let opened = receiver.open(CONTENT_APPLICATION_DATA, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn record_layer_rejects_tampered_ciphertext() {
        let mut sender = RecordKeys { mac_key: [0x33; 32], enc_key: [0x44; 16], seq: 0 };
        let mut receiver = RecordKeys { mac_key: [0x33; 32], enc_key: [0x44; 16], seq: 0 };

        let mut sealed = sender.seal(CONTENT_APPLICATION_DATA, b"hello");
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(receiver.open(CONTENT_APPLICATION_DATA, &sealed).is_err());
    }

    #[test]
    fn key_block_halves_are_independent() {
        let client_random = [0xaa; 32];
        let server_random = [0xbb; 32];
        let block = derive_key_block(&[0x01; 48], &client_random, &server_random);
        assert_ne!(block.client.enc_key, block.server.enc_key);
        assert_ne!(block.client.mac_key, block.server.mac_key);
    }

    #[test]
    fn loopback_pair_delivers_bytes_in_order() {
        let mut pair = LoopbackPair { outgoing: VecDeque::new(), incoming: VecDeque::from(alloc::vec![1, 2, 3]) };
        let mut buf = [0u8; 3];
        pair.recv_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        pair.send(&[9, 9]).unwrap();
        assert_eq!(pair.outgoing, VecDeque::from(alloc::vec![9, 9]));
    }
}
