// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTML pages served by the simulator, shaped like the certsrv originals.

pub(super) const PENDING_MESSAGE: &str = "Taken Under Submission";
pub(super) const PENDING_STATUS: &str = "The operation completed successfully. 0x0 (WIN32: 0)";

pub(super) const REJECTED_MESSAGE: &str = "Denied by CS simulator";
pub(super) const REJECTED_STATUS: &str = "The request was denied by a certificate manager or CA administrator. 0x80094014 (-2146877420 CERTSRV_E_ADMIN_DENIED_REQUEST)";

const HEAD: &str = "<HTML><Head><Meta HTTP-Equiv=\"Content-Type\" Content-Type=\"text/html; charset=UTF-8\">\r\n<Title>Microsoft Active Directory Certificate Services</Title>\r\n</Head><Body BgColor=#FFFFFF>\r\n";
const TAIL: &str = "</Body></HTML>\r\n";

/// `certnew.cer` disposition page.
pub(super) fn disposition(message: &str, last_status: &str) -> String {
    format!(
        "{HEAD}<P ID=locPageTitle><Font Size=+1><B>Certificate Pending</B></Font></P>\r\n\
         <Table Border=0 CellSpacing=0 CellPadding=0>\r\n\
         <TR><TD ID=locDispositionLabel>Disposition message:</TD><TD>\t\t{message}\r\n</TD></TR>\r\n\
         <TR><TD ID=locLastStatusLabel>LastStatus:</TD><TD>\t\t{last_status}\r\n</TD></TR>\r\n\
         </Table>\r\n{TAIL}"
    )
}

/// `certfnsh.asp` page for a request that was taken under submission.
pub(super) fn submitted(id: u64) -> String {
    format!(
        "{HEAD}<P ID=locPageTitle><Font Size=+1><B>Certificate Pending</B></Font></P>\r\n\
         <P ID=locInfoReqIDAndWait>Your certificate request has been received. Your Request Id is {id}.</P>\r\n\
         <A Href=\"certnew.cer?ReqID={id}&amp;Enc=b64\">Download certificate</A>\r\n{TAIL}"
    )
}

/// `certcarc.asp` page exposing the CA renewal counter.
pub(super) fn ca_renewals(renewals: u32) -> String {
    format!(
        "{HEAD}<Script Language=\"JavaScript\">\r\n\
         var nRenewals={renewals};\r\n\
         </Script>\r\n\
         <P ID=locPageTitle><Font Size=+1><B>Download a CA Certificate, Certificate Chain, or CRL</B></Font></P>\r\n{TAIL}"
    )
}

/// Body of a `401` answer.
pub(super) fn unauthorized() -> String {
    format!("{HEAD}<H2>401 - Unauthorized: Access is denied due to invalid credentials.</H2>\r\n{TAIL}")
}
