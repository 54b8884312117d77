mod stream_request_extractor;
