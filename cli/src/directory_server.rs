// Report directory served over HTTP
//
// Same JSON contract as the hosted service: POST /register and POST /query
// with base64 fields. Records live in memory for the lifetime of the process.

use keybeacon_core::directory::{QueryRequest, RegisterRequest};
use keybeacon_core::MemoryDirectory;
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{debug, info};
use warp::Filter;

pub fn routes(
    directory: MemoryDirectory,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let directory_filter = warp::any().map(move || directory.clone());

    let register_route = warp::path("register")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(directory_filter.clone())
        .and_then(handle_register);

    let query_route = warp::path("query")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(directory_filter)
        .and_then(handle_query);

    register_route.or(query_route)
}

pub async fn serve(directory: MemoryDirectory, addr: SocketAddr) {
    info!("Directory listening on http://{}", addr);
    warp::serve(routes(directory)).run(addr).await;
}

async fn handle_register(
    request: RegisterRequest,
    directory: MemoryDirectory,
) -> Result<impl warp::Reply, Infallible> {
    let response = directory.handle_register(request);
    debug!("register -> code {}", response.code);
    Ok(warp::reply::json(&response))
}

async fn handle_query(
    request: QueryRequest,
    directory: MemoryDirectory,
) -> Result<impl warp::Reply, Infallible> {
    let response = directory.handle_query(request);
    debug!("query -> {} record(s)", response.results.len());
    Ok(warp::reply::json(&response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keybeacon_core::directory::{CODE_INVALID_KEY, CODE_OK};
    use keybeacon_core::{DirectoryClient, DirectoryConfig, HttpDirectory, KeyMaterial};

    async fn spawn_server(directory: MemoryDirectory) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        tokio::spawn(serve(directory, addr));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        addr
    }

    #[tokio::test]
    async fn test_handlers_follow_directory_rules() {
        let directory = MemoryDirectory::new();
        let response = directory.handle_register(RegisterRequest {
            key: vec![1; 10],
            content: vec![2; 64],
        });
        assert_eq!(response.code, CODE_INVALID_KEY);

        let _ = handle_register(
            RegisterRequest {
                key: vec![1; 64],
                content: vec![2; 64],
            },
            directory.clone(),
        )
        .await
        .unwrap();
        assert_eq!(directory.report_count(), 1);

        let response = directory.handle_query(QueryRequest { key: vec![9; 64] });
        assert_eq!(response.code, CODE_OK);
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn test_http_client_against_local_server() {
        let directory = MemoryDirectory::new();
        let addr = spawn_server(directory.clone()).await;
        let client = HttpDirectory::new(
            DirectoryConfig::default().with_base_url(format!("http://{}", addr)),
        );

        let key = KeyMaterial::from([0x5A; 64]);
        client.register(&key, b"ciphertext").await.unwrap();
        client.register(&key, b"second").await.unwrap();

        let records = client.query(&key).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, b"ciphertext");
        assert!(records[0].timestamp <= records[1].timestamp);
        assert_eq!(directory.report_count(), 2);
    }
}
