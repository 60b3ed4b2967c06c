use super::*;

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        batch_size: 128,
        timeout_secs: 7,
        retry_attempts: 2,
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.timeout(), Duration::from_secs(7));
    assert_eq!(client.retry_attempts, 2);
}

#[test]
fn zero_retry_attempts_falls_back_to_default() {
    let config = OllamaConfig {
        retry_attempts: 0,
        ..OllamaConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.retry_attempts, 5);
    assert_eq!(client.timeout(), Duration::from_secs(60));
}

#[test]
fn decoder_yields_chunks_in_order() {
    let body = concat!(
        "{\"model\":\"m\",\"response\":\"The\",\"done\":false}\n",
        "\n",
        "{\"model\":\"m\",\"response\":\" sky\",\"done\":false}\n",
        "{\"model\":\"m\",\"response\":\"\",\"done\":true,\"total_duration\":12}\n",
    );
    let chunks: Vec<GenerateChunk> = GenerateChunkDecoder::default()
        .push(body.as_bytes())
        .into_iter()
        .collect::<Result<_>>()
        .expect("stream should parse");

    let fragments: Vec<&str> = chunks.iter().map(|c| c.response.as_str()).collect();
    assert_eq!(fragments, vec!["The", " sky", ""]);
    assert!(chunks[2].done);
}

#[test]
fn decoder_joins_lines_split_across_reads() {
    let body = "{\"response\":\"caf\u{e9}\",\"done\":false}\n{\"response\":\"!\",\"done\":true}";
    let bytes = body.as_bytes();
    // Split inside the two-byte 'é' and inside the second line.
    let split = body.find('\u{e9}').expect("accented char") + 1;
    let second_line = body.find('\n').expect("newline") + 1;
    let mut decoder = GenerateChunkDecoder::default();

    assert!(decoder.push(&bytes[..split]).is_empty());
    let first = decoder.push(&bytes[split..second_line + 5]);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].as_ref().expect("first chunk").response, "caf\u{e9}");

    assert!(decoder.push(&bytes[second_line + 5..]).is_empty());
    let last = decoder.finish().expect("unterminated last line").expect("parses");
    assert_eq!(last.response, "!");
    assert!(last.done);
    assert!(decoder.finish().is_none());
}

#[test]
fn decoder_surfaces_model_errors() {
    let body = "{\"response\":\"ok\",\"done\":false}\n{\"error\":\"model crashed\"}\n";
    let mut chunks = GenerateChunkDecoder::default().push(body.as_bytes()).into_iter();

    assert!(chunks.next().expect("first item").is_ok());
    let err = chunks
        .next()
        .expect("second item")
        .expect_err("error payload should fail");
    assert!(err.to_string().contains("model crashed"));
}

#[test]
fn decoder_rejects_malformed_lines() {
    let chunks = GenerateChunkDecoder::default().push(b"not json\n");
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].is_err());
}

#[test]
fn embedding_of_nothing_makes_no_request() {
    // Port 9 is discard; any request would fail.
    let config = OllamaConfig {
        port: 9,
        retry_attempts: 1,
        ..OllamaConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");
    let embeddings = client.embed("all-minilm", &[]).expect("empty input");
    assert!(embeddings.is_empty());
}
