#![cfg(feature = "protocol")]

use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use operate_console::{
    RunOptions,
    console::{ConsoleConfig, FilterChange, bridge::default_service_bundle},
    run_app,
};

const INSTANCE_ID: &str = "2251799813685251";

const ORDER_PROCESS_XML: &str = r#"<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL"><bpmn:process id="order-process"><bpmn:serviceTask id="chargeCard" name="Charge card" /></bpmn:process></bpmn:definitions>"#;

/// Answers every connection from canned Operate responses and records the
/// request lines it saw.
fn serve_operate() -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let request = read_request(&mut stream);
            let line = request.lines().next().unwrap_or_default().to_string();
            respond(&mut stream, &line);
            log.lock().unwrap().push(line);
        }
    });
    (format!("http://{addr}"), seen)
}

fn respond(stream: &mut TcpStream, request_line: &str) {
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    let (status, body) = if path == "/api/workflows/grouped" {
        (
            "200 OK",
            serde_json::json!([{
                "bpmnProcessId": "order-process",
                "name": "Order process",
                "workflows": [
                    {"id": "2251799813685249", "name": "Order process", "version": 1, "bpmnProcessId": "order-process"},
                    {"id": "2251799813685250", "name": "Order process", "version": 2, "bpmnProcessId": "order-process"}
                ]
            }]),
        )
    } else if path.starts_with("/api/workflow-instances?") {
        (
            "200 OK",
            serde_json::json!({"workflowInstances": [instance_json()], "totalCount": 1}),
        )
    } else if path.ends_with("/incidents") {
        (
            "200 OK",
            serde_json::json!({
                "count": 1,
                "incidents": [{
                    "id": "2251799813685301",
                    "errorType": "JOB_NO_RETRIES",
                    "errorMessage": "No more retries left.",
                    "flowNodeId": "chargeCard",
                    "flowNodeInstanceId": "2251799813685299",
                    "jobId": "2251799813685300",
                    "creationTime": "2023-01-02T10:00:05.000+0000",
                    "hasActiveOperation": false
                }],
                "errorTypes": [{"errorType": "JOB_NO_RETRIES", "count": 1}],
                "flowNodes": [{"flowNodeId": "chargeCard", "count": 1}]
            }),
        )
    } else if path.ends_with("/sequence-flows") {
        (
            "200 OK",
            serde_json::json!([
                {"id": "1", "workflowInstanceId": INSTANCE_ID, "activityId": "start"},
                {"id": "2", "workflowInstanceId": INSTANCE_ID, "activityId": "chargeCard"}
            ]),
        )
    } else if path == format!("/api/workflow-instances/{INSTANCE_ID}") {
        ("200 OK", instance_json())
    } else if path == "/api/workflows/2251799813685250/xml" {
        return write_response(stream, "200 OK", "application/xml", ORDER_PROCESS_XML);
    } else {
        (
            "404 Not Found",
            serde_json::json!({"message": "not found", "status": 404}),
        )
    };

    write_response(stream, status, "application/json", &body.to_string());
}

fn write_response(stream: &mut TcpStream, status: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}

fn instance_json() -> serde_json::Value {
    serde_json::json!({
        "id": INSTANCE_ID,
        "workflowId": "2251799813685250",
        "workflowName": "Order process",
        "workflowVersion": 2,
        "state": "INCIDENT",
        "startDate": "2023-01-02T10:00:00.000+0000",
        "endDate": null
    })
}

fn read_request(stream: &mut impl Read) -> String {
    let mut raw = Vec::new();
    let mut buffer = [0u8; 1024];
    loop {
        let read = stream.read(&mut buffer).unwrap_or(0);
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&buffer[..read]);

        let text = String::from_utf8_lossy(&raw);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if raw.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&raw).to_string()
}

#[test]
fn console_drives_every_endpoint_for_a_selected_incident() {
    let (base_url, seen) = serve_operate();
    let config = ConsoleConfig {
        base_url: base_url.clone(),
        ..ConsoleConfig::default()
    };
    let bundle = default_service_bundle(&base_url).expect("client construction");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let result = runtime.block_on(run_app(
        &config,
        &bundle,
        RunOptions {
            instance: Some(INSTANCE_ID.to_string()),
            query: Some("sortBy=startDate&sortOrder=asc".to_string()),
            changes: vec![FilterChange::Workflow("order-process".to_string())],
        },
        async { tokio::time::sleep(Duration::from_secs(2)).await },
    ));
    drop(runtime);
    drop(bundle);
    result.expect("console run");

    let seen = seen.lock().unwrap().clone();
    let contains = |needle: &str| seen.iter().any(|line| line.contains(needle));
    assert!(contains("GET /api/workflows/grouped"));
    assert!(contains("POST /api/workflow-instances?firstResult=0&maxResults=50"));
    assert!(contains(&format!("GET /api/workflow-instances/{INSTANCE_ID} ")));
    assert!(contains(&format!("GET /api/workflow-instances/{INSTANCE_ID}/incidents")));
    assert!(contains(&format!(
        "GET /api/workflow-instances/{INSTANCE_ID}/sequence-flows"
    )));
    assert!(contains("GET /api/workflows/2251799813685250/xml"));
}
