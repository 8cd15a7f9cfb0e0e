use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ledger::RemoteLedger;
use crate::token::RemoteTokenLedger;
use crate::types::{
    Address, NativeAmount, NewPrediction, Page, PredictionId, PredictionOption, RawPrediction,
    TokenAmount, TxHash,
};

/// HTTP binding to the signing gateway that fronts the settlement ledger and
/// the stake token. The gateway signs with its configured key; this client
/// only shapes requests and maps failures. A 4xx carries the ledger's revert
/// reason verbatim in the body and surfaces as [`Error::Reverted`].
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    url: String,
}

impl HttpGateway {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url.clone() + path)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(self.url.clone() + path)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        if status.is_client_error() {
            return Err(Error::Reverted(body));
        }
        if !status.is_success() {
            return Err(Error::Network(format!(
                "gateway returned {}: {}",
                status, body
            )));
        }
        serde_json::from_str(&body).map_err(|e| Error::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl RemoteLedger for HttpGateway {
    async fn admin(&self) -> Result<Address> {
        let body: AddressResponse = self.get("/api/v1/admin").await?;
        Ok(body.address)
    }
    async fn platform_fee_percent(&self) -> Result<u64> {
        let body: FeeResponse = self.get("/api/v1/fee").await?;
        Ok(body.fee_percent)
    }
    async fn native_balance(&self, account: &Address) -> Result<NativeAmount> {
        let body: BalanceResponse = self
            .get(&format!("/api/v1/accounts/{}/balance", account))
            .await?;
        Ok(body.balance)
    }
    async fn get_prediction(&self, id: PredictionId) -> Result<RawPrediction> {
        self.get(&format!("/api/v1/predictions/{}", id)).await
    }
    async fn get_open_predictions(&self, offset: u64, limit: u64) -> Result<Page> {
        self.get(&format!(
            "/api/v1/predictions/open?offset={}&limit={}",
            offset, limit
        ))
        .await
    }
    async fn get_matched_predictions(&self, offset: u64, limit: u64) -> Result<Page> {
        self.get(&format!(
            "/api/v1/predictions/matched?offset={}&limit={}",
            offset, limit
        ))
        .await
    }
    async fn get_user_predictions(&self, account: &Address) -> Result<Vec<PredictionId>> {
        let body: IdsResponse = self
            .get(&format!("/api/v1/accounts/{}/predictions", account))
            .await?;
        Ok(body.ids)
    }
    async fn get_winner(&self, id: PredictionId) -> Result<Address> {
        let body: AddressResponse = self
            .get(&format!("/api/v1/predictions/{}/winner", id))
            .await?;
        Ok(body.address)
    }
    async fn create_prediction(
        &self,
        params: &NewPrediction,
        fee_limit: NativeAmount,
    ) -> Result<TxHash> {
        let request = CreateRequest {
            title: params.title.clone(),
            description: params.description.clone(),
            option_a: params.option_a.clone(),
            option_b: params.option_b.clone(),
            bet_amount: params.bet_amount,
            creator_choice: params.creator_choice.code(),
            expiry_time: params.expiry_time,
            fee_limit,
        };
        let body: TxResponse = self.post("/api/v1/predictions", &request).await?;
        Ok(body.hash)
    }
    async fn join_prediction(
        &self,
        id: PredictionId,
        choice: PredictionOption,
        fee_limit: NativeAmount,
    ) -> Result<TxHash> {
        let request = JoinRequest {
            choice: choice.code(),
            fee_limit,
        };
        let body: TxResponse = self
            .post(&format!("/api/v1/predictions/{}/join", id), &request)
            .await?;
        Ok(body.hash)
    }
    async fn resolve_prediction(
        &self,
        id: PredictionId,
        winning_option: PredictionOption,
        fee_limit: NativeAmount,
    ) -> Result<TxHash> {
        let request = ResolveRequest {
            winning_option: winning_option.code(),
            fee_limit,
        };
        let body: TxResponse = self
            .post(&format!("/api/v1/predictions/{}/resolve", id), &request)
            .await?;
        Ok(body.hash)
    }
    async fn claim_winnings(&self, id: PredictionId, fee_limit: NativeAmount) -> Result<TxHash> {
        let request = FeeLimitRequest { fee_limit };
        let body: TxResponse = self
            .post(&format!("/api/v1/predictions/{}/claim", id), &request)
            .await?;
        Ok(body.hash)
    }
    async fn cancel_prediction(
        &self,
        id: PredictionId,
        fee_limit: NativeAmount,
    ) -> Result<TxHash> {
        let request = FeeLimitRequest { fee_limit };
        let body: TxResponse = self
            .post(&format!("/api/v1/predictions/{}/cancel", id), &request)
            .await?;
        Ok(body.hash)
    }
    async fn emergency_refund(
        &self,
        id: PredictionId,
        fee_limit: NativeAmount,
    ) -> Result<TxHash> {
        let request = FeeLimitRequest { fee_limit };
        let body: TxResponse = self
            .post(&format!("/api/v1/predictions/{}/refund", id), &request)
            .await?;
        Ok(body.hash)
    }
}

#[async_trait]
impl RemoteTokenLedger for HttpGateway {
    async fn balance_of(&self, account: &Address) -> Result<TokenAmount> {
        let body: BalanceResponse = self
            .get(&format!("/api/v1/token/{}/balance", account))
            .await?;
        Ok(body.balance)
    }
    async fn allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        let body: BalanceResponse = self
            .get(&format!("/api/v1/token/{}/allowance/{}", owner, spender))
            .await?;
        Ok(body.balance)
    }
    async fn approve(
        &self,
        spender: &Address,
        amount: TokenAmount,
        fee_limit: NativeAmount,
    ) -> Result<TxHash> {
        let request = ApproveRequest {
            spender: spender.clone(),
            amount,
            fee_limit,
        };
        let body: TxResponse = self.post("/api/v1/token/approve", &request).await?;
        Ok(body.hash)
    }
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    address: Address,
}
#[derive(Debug, Deserialize)]
struct FeeResponse {
    fee_percent: u64,
}
#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: u64,
}
#[derive(Debug, Deserialize)]
struct IdsResponse {
    ids: Vec<PredictionId>,
}
#[derive(Debug, Deserialize)]
struct TxResponse {
    hash: TxHash,
}
#[derive(Debug, Serialize)]
struct CreateRequest {
    title: String,
    description: String,
    option_a: String,
    option_b: String,
    bet_amount: TokenAmount,
    creator_choice: u8,
    expiry_time: i64,
    fee_limit: NativeAmount,
}
#[derive(Debug, Serialize)]
struct JoinRequest {
    choice: u8,
    fee_limit: NativeAmount,
}
#[derive(Debug, Serialize)]
struct ResolveRequest {
    winning_option: u8,
    fee_limit: NativeAmount,
}
#[derive(Debug, Serialize)]
struct FeeLimitRequest {
    fee_limit: NativeAmount,
}
#[derive(Debug, Serialize)]
struct ApproveRequest {
    spender: Address,
    amount: TokenAmount,
    fee_limit: NativeAmount,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prediction_wire_shape_decodes() {
        let json = r#"{
            "id": 7,
            "creator": "0xAbC0000000000000000000000000000000000001",
            "opponent": "0x0000000000000000000000000000000000000000",
            "title": "Will it rain tomorrow",
            "description": "",
            "option_a": "Rain",
            "option_b": "Dry",
            "bet_amount": 5000000,
            "creator_choice": 1,
            "opponent_choice": 0,
            "status": 0,
            "winning_option": 0,
            "created_at": 1700000000,
            "expiry_time": 1700003600
        }"#;
        let raw: RawPrediction = serde_json::from_str(json).unwrap();
        assert_eq!(raw.id, 7);
        // Addresses normalize to lowercase on the way in.
        assert_eq!(
            raw.creator.as_str(),
            "0xabc0000000000000000000000000000000000001"
        );
        assert!(raw.opponent.is_zero());
    }

    #[test]
    fn page_wire_shape_decodes() {
        let page: Page = serde_json::from_str(r#"{"ids": [3, 1, 8], "total": 12}"#).unwrap();
        assert_eq!(page.ids, vec![3, 1, 8]);
        assert_eq!(page.total, 12);
    }

    #[test]
    fn write_requests_carry_coded_enums_and_the_fee_ceiling() {
        let request = CreateRequest {
            title: "Title".to_string(),
            description: "Description".to_string(),
            option_a: "Yes".to_string(),
            option_b: "No".to_string(),
            bet_amount: 1_000_000,
            creator_choice: PredictionOption::OptionA.code(),
            expiry_time: 1_700_003_600,
            fee_limit: 100_000_000,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["title"], "Title");
        assert_eq!(value["creator_choice"], 1);
        assert_eq!(value["fee_limit"], 100_000_000);

        let request = JoinRequest {
            choice: PredictionOption::OptionB.code(),
            fee_limit: 100_000_000,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["choice"], 2);
    }
}
